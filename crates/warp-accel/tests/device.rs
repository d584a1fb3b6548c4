//! Tests against custom compute devices and device limits

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use warp_accel::{
    AccelConfig, AccelContext, ChannelOrder, ChannelType, ComputeDevice, DeviceError, DeviceInfo,
    Dims, Error, Event, HostDevice, ImageFormat, MemDesc, MemFlags, MemHandle, Region, Result,
    SharedHostMemory, UserEvent,
};

/// Device whose reads fail after submission, as if the context was lost
struct LossyDevice {
    inner: HostDevice,
    reads: AtomicUsize,
}

impl LossyDevice {
    fn new() -> Self {
        Self {
            inner: HostDevice::new().unwrap(),
            reads: AtomicUsize::new(0),
        }
    }
}

impl ComputeDevice for LossyDevice {
    fn info(&self) -> &DeviceInfo {
        self.inner.info()
    }

    fn supports_format(&self, format: &ImageFormat) -> bool {
        self.inner.supports_format(format)
    }

    fn free_memory(&self) -> usize {
        self.inner.free_memory()
    }

    fn allocate(&self, desc: &MemDesc, flags: MemFlags, initial: Option<&[u8]>) -> Result<MemHandle> {
        self.inner.allocate(desc, flags, initial)
    }

    fn release(&self, mem: MemHandle) -> Result<()> {
        self.inner.release(mem)
    }

    fn enqueue_write(
        &self,
        dst: MemHandle,
        region: Region,
        src: SharedHostMemory,
        wait: &[Event],
    ) -> Result<Event> {
        self.inner.enqueue_write(dst, region, src, wait)
    }

    fn enqueue_read(
        &self,
        _src: MemHandle,
        _region: Region,
        _dst: SharedHostMemory,
        _wait: &[Event],
    ) -> Result<Event> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let failure = UserEvent::new();
        let event = failure.event();
        failure.fail("context lost");
        Ok(event)
    }

    fn enqueue_copy(
        &self,
        src: MemHandle,
        src_region: Region,
        dst: MemHandle,
        dst_region: Region,
        wait: &[Event],
    ) -> Result<Event> {
        self.inner.enqueue_copy(src, src_region, dst, dst_region, wait)
    }

    fn finish(&self) -> Result<()> {
        self.inner.finish()
    }
}

#[test]
fn test_execution_failure_reported_at_wait() {
    let device = Arc::new(LossyDevice::new());
    let ctx = AccelContext::with_device(device.clone());
    let image = ctx
        .init_image(MemFlags::READ_WRITE, Dims::d2(2, 2), vec![1.0f32; 4])
        .unwrap();

    // Submission itself succeeds
    let pending = ctx.read_image_async(&image).unwrap();
    assert_eq!(device.reads.load(Ordering::Relaxed), 1);

    let err = pending.wait().unwrap_err();
    assert!(matches!(err, Error::Device(DeviceError::ExecutionFailed(_))));

    // The blocking form reports the same failure
    assert!(matches!(
        ctx.read_image(&image),
        Err(Error::Device(DeviceError::ExecutionFailed(_)))
    ));
}

#[test]
fn test_validation_never_reaches_device() {
    let device = Arc::new(LossyDevice::new());
    let ctx = AccelContext::with_device(device.clone());
    let image = ctx
        .create_image::<[u8; 4]>(MemFlags::READ_WRITE, Dims::d2(4, 4))
        .unwrap();

    assert!(ctx
        .read_image_region_async(&image, (3, 0), Dims::d2(2, 2), &[])
        .is_err());
    assert_eq!(device.reads.load(Ordering::Relaxed), 0);
}

#[test]
fn test_format_unsupported() {
    let rgba8 = ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnsignedInt8);
    let config = AccelConfig {
        supported_formats: Some(vec![rgba8]),
        ..Default::default()
    };
    let ctx = AccelContext::with_config(config).unwrap();

    assert!(ctx
        .init_image(MemFlags::READ_WRITE, Dims::d2(2, 2), vec![[0u8; 4]; 4])
        .is_ok());

    let rgba_u32 = ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnsignedInt32);
    let err = ctx
        .init_image_fmt(MemFlags::READ_WRITE, rgba_u32, Dims::d2(2, 2), vec![[0u32; 4]; 4])
        .unwrap_err();
    assert!(matches!(err, Error::FormatUnsupported(f) if f == rgba_u32));
}

#[test]
fn test_init_image_fmt_layout_checks() {
    let ctx = AccelContext::new().unwrap();

    // Same size per pixel, different interpretation is allowed
    let as_u32 = ImageFormat::new(ChannelOrder::Rgb, ChannelType::UnsignedInt32);
    let image = ctx
        .init_image_fmt(MemFlags::READ_WRITE, as_u32, Dims::d1(2), vec![[1.0f32; 3]; 2])
        .unwrap();
    assert_eq!(image.format(), as_u32);

    let two_channel = ImageFormat::new(ChannelOrder::Rg, ChannelType::Float32);
    let err = ctx
        .init_image_fmt(MemFlags::READ_WRITE, two_channel, Dims::d1(2), vec![[1.0f32; 3]; 2])
        .unwrap_err();
    assert!(matches!(err, Error::LayoutIncompatible(_)));
}

#[test]
fn test_allocation_limits() {
    let config = AccelConfig {
        global_mem_size: 1024,
        ..Default::default()
    };
    let ctx = AccelContext::with_config(config).unwrap();

    let first = ctx
        .create_image::<[u8; 4]>(MemFlags::READ_WRITE, Dims::d2(16, 16))
        .unwrap();
    assert_eq!(ctx.free_memory(), 0);

    let err = ctx.create_buffer::<u8>(MemFlags::READ_WRITE, 1).unwrap_err();
    assert!(matches!(err, Error::Allocation { requested: 1, available: 0, .. }));

    drop(first);
    assert_eq!(ctx.free_memory(), 1024);
    assert!(ctx.create_buffer::<u8>(MemFlags::READ_WRITE, 1).is_ok());
}

#[test]
fn test_initial_data_conflicts_with_host_flags() {
    let ctx = AccelContext::new().unwrap();
    for flags in [MemFlags::HOST_NO_ACCESS, MemFlags::HOST_READ_ONLY] {
        let err = ctx
            .init_image(flags, Dims::d2(2, 2), vec![0u8; 4])
            .unwrap_err();
        assert!(matches!(err, Error::Allocation { .. }), "{flags:?}");
    }
}

#[test]
fn test_config_from_toml_drives_queue() {
    let config = AccelConfig::from_toml_str(
        r#"
        device_name = "toml device"
        queue_order = "out_of_order"
        worker_threads = 2
        "#,
    )
    .unwrap();
    let ctx = AccelContext::with_config(config).unwrap();
    assert_eq!(ctx.info().name, "toml device");
    assert_eq!(ctx.info().queue_order, warp_accel::QueueOrder::OutOfOrder);

    let image = ctx
        .init_image(MemFlags::READ_WRITE, Dims::d2(3, 3), vec![[9i32; 2]; 9])
        .unwrap();
    assert_eq!(ctx.read_image(&image).unwrap(), vec![[9, 9]; 9]);
}
