//! Device memory objects
//!
//! Typed handles for device images ([`Image`]) and buffers ([`Buffer`]) and
//! the operations that create them. A handle is a reference-counted pointer
//! to the underlying device object; the object is released when the last
//! handle is dropped or when [`Image::release`] / [`Buffer::release`] is
//! called explicitly.
//!
//! # Creation
//!
//! ```
//! # fn main() -> warp_accel::Result<()> {
//! use warp_accel::{AccelContext, Dims, MemFlags};
//!
//! let ctx = AccelContext::new()?;
//! let pixels = vec![[0.5f32, 0.25, 1.0]; 4];
//! let image = ctx.init_image(MemFlags::READ_WRITE, Dims::d2(2, 2), pixels)?;
//! assert_eq!(image.dims(), Dims::d2(2, 2));
//! # Ok(())
//! # }
//! ```

use crate::channel::{self, Pixel};
use crate::context::AccelContext;
use crate::device::{ComputeDevice, MemDesc, MemHandle};
use crate::format::ImageFormat;
use crate::geometry::Dims;
use crate::{Error, Result};
use bitflags::bitflags;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

bitflags! {
    /// Access flags of a memory object
    ///
    /// At most one device access flag and at most one host access flag may be
    /// set. With no device flag the object is read-write for kernels; with no
    /// host flag the host may both read and write it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemFlags: u32 {
        /// Kernels may read and write
        const READ_WRITE      = 1 << 0;
        /// Kernels may only write
        const WRITE_ONLY      = 1 << 1;
        /// Kernels may only read
        const READ_ONLY       = 1 << 2;
        /// Host may only write
        const HOST_WRITE_ONLY = 1 << 3;
        /// Host may only read
        const HOST_READ_ONLY  = 1 << 4;
        /// Host may neither read nor write
        const HOST_NO_ACCESS  = 1 << 5;
    }
}

impl Default for MemFlags {
    fn default() -> Self {
        MemFlags::READ_WRITE
    }
}

impl MemFlags {
    const DEVICE_ACCESS: MemFlags = MemFlags::READ_WRITE
        .union(MemFlags::WRITE_ONLY)
        .union(MemFlags::READ_ONLY);
    const HOST_ACCESS: MemFlags = MemFlags::HOST_WRITE_ONLY
        .union(MemFlags::HOST_READ_ONLY)
        .union(MemFlags::HOST_NO_ACCESS);

    /// Reject contradictory flag combinations
    pub fn validate(&self) -> Result<()> {
        if self.intersection(Self::DEVICE_ACCESS).bits().count_ones() > 1 {
            return Err(Error::InvalidParameter(format!(
                "conflicting device access flags: {:?}",
                self.intersection(Self::DEVICE_ACCESS)
            )));
        }
        if self.intersection(Self::HOST_ACCESS).bits().count_ones() > 1 {
            return Err(Error::InvalidParameter(format!(
                "conflicting host access flags: {:?}",
                self.intersection(Self::HOST_ACCESS)
            )));
        }
        Ok(())
    }

    /// Whether the host may read the object
    pub fn host_readable(&self) -> bool {
        !self.intersects(MemFlags::HOST_WRITE_ONLY | MemFlags::HOST_NO_ACCESS)
    }

    /// Whether the host may write the object
    pub fn host_writable(&self) -> bool {
        !self.intersects(MemFlags::HOST_READ_ONLY | MemFlags::HOST_NO_ACCESS)
    }
}

/// Shared state behind image and buffer handles
pub(crate) struct MemObject {
    handle: MemHandle,
    desc: MemDesc,
    flags: MemFlags,
    device: Arc<dyn ComputeDevice>,
    released: AtomicBool,
}

impl MemObject {
    fn new(device: Arc<dyn ComputeDevice>, handle: MemHandle, desc: MemDesc, flags: MemFlags) -> Arc<Self> {
        Arc::new(Self {
            handle,
            desc,
            flags,
            device,
            released: AtomicBool::new(false),
        })
    }

    pub(crate) fn handle(&self) -> MemHandle {
        self.handle
    }

    pub(crate) fn desc(&self) -> &MemDesc {
        &self.desc
    }

    pub(crate) fn check_host_read(&self) -> Result<()> {
        if !self.flags.host_readable() {
            return Err(Error::AccessDenied(format!(
                "memory object {} is not host readable ({:?})",
                self.handle.raw(),
                self.flags
            )));
        }
        Ok(())
    }

    pub(crate) fn check_host_write(&self) -> Result<()> {
        if !self.flags.host_writable() {
            return Err(Error::AccessDenied(format!(
                "memory object {} is not host writable ({:?})",
                self.handle.raw(),
                self.flags
            )));
        }
        Ok(())
    }

    fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("Releasing memory object {}", self.handle.raw());
        self.device.release(self.handle)
    }
}

impl Drop for MemObject {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release memory object {}: {}", self.handle.raw(), e);
        }
    }
}

/// Device image holding pixels of type `P`
pub struct Image<P: Pixel> {
    pub(crate) mem: Arc<MemObject>,
    _pixel: PhantomData<fn() -> P>,
}

impl<P: Pixel> Image<P> {
    fn new(mem: Arc<MemObject>) -> Self {
        Self { mem, _pixel: PhantomData }
    }

    /// Image extent in pixels
    pub fn dims(&self) -> Dims {
        self.mem.desc.dims
    }

    /// Device pixel format
    pub fn format(&self) -> ImageFormat {
        self.mem.desc.format
    }

    /// Access flags
    pub fn flags(&self) -> MemFlags {
        self.mem.flags
    }

    /// Number of pixels
    pub fn pixel_count(&self) -> usize {
        self.mem.desc.dims.volume()
    }

    /// Device handle
    pub fn handle(&self) -> MemHandle {
        self.mem.handle
    }

    /// Release the device image now
    ///
    /// Other handles to the same image become invalid; transfers through
    /// them fail with a device error.
    pub fn release(self) -> Result<()> {
        self.mem.release()
    }
}

impl<P: Pixel> Clone for Image<P> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.mem))
    }
}

impl<P: Pixel> fmt::Debug for Image<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("handle", &self.mem.handle.raw())
            .field("dims", &self.mem.desc.dims)
            .field("format", &self.mem.desc.format)
            .field("flags", &self.mem.flags)
            .finish()
    }
}

/// Device buffer holding elements of type `P`
pub struct Buffer<P: Pixel> {
    pub(crate) mem: Arc<MemObject>,
    _pixel: PhantomData<fn() -> P>,
}

impl<P: Pixel> Buffer<P> {
    fn new(mem: Arc<MemObject>) -> Self {
        Self { mem, _pixel: PhantomData }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.mem.desc.dims.volume()
    }

    /// Whether the buffer holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element format
    pub fn format(&self) -> ImageFormat {
        self.mem.desc.format
    }

    /// Access flags
    pub fn flags(&self) -> MemFlags {
        self.mem.flags
    }

    /// Device handle
    pub fn handle(&self) -> MemHandle {
        self.mem.handle
    }

    /// Release the device buffer now
    pub fn release(self) -> Result<()> {
        self.mem.release()
    }
}

impl<P: Pixel> Clone for Buffer<P> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.mem))
    }
}

impl<P: Pixel> fmt::Debug for Buffer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.mem.handle.raw())
            .field("len", &self.len())
            .field("format", &self.mem.desc.format)
            .field("flags", &self.mem.flags)
            .finish()
    }
}

impl AccelContext {
    /// Create an image from host pixels, deducing the format from `P`
    ///
    /// # Errors
    /// - `DimensionMismatch` if `pixels.len() != dims.volume()`
    /// - `Allocation` if the device cannot satisfy the request
    /// - `FormatUnsupported` if the device rejects the deduced format
    pub fn init_image<P: Pixel>(&self, flags: MemFlags, dims: impl Into<Dims>, pixels: Vec<P>) -> Result<Image<P>> {
        self.init_image_fmt(flags, ImageFormat::of::<P>(), dims, pixels)
    }

    /// Create an image from host pixels with an explicit device format
    ///
    /// # Errors
    /// As [`AccelContext::init_image`], plus `LayoutIncompatible` if `format`
    /// does not describe pixels of type `P`
    pub fn init_image_fmt<P: Pixel>(
        &self,
        flags: MemFlags,
        format: ImageFormat,
        dims: impl Into<Dims>,
        pixels: Vec<P>,
    ) -> Result<Image<P>> {
        let dims = dims.into();
        dims.validate()?;
        flags.validate()?;
        check_format::<P>(&format)?;

        let expected = dims.volume();
        if pixels.len() != expected {
            return Err(Error::dimension_mismatch(expected, pixels.len()));
        }

        let flat = channel::flatten(pixels)?;
        let desc = MemDesc::image(dims, format);
        let handle = self.allocate(&desc, flags, Some(bytemuck::cast_slice(&flat)))?;

        debug!("Created image {} {} {}", handle.raw(), dims, format);
        Ok(Image::new(MemObject::new(self.device_arc(), handle, desc, flags)))
    }

    /// Create a zero-filled image
    pub fn create_image<P: Pixel>(&self, flags: MemFlags, dims: impl Into<Dims>) -> Result<Image<P>> {
        let dims = dims.into();
        dims.validate()?;
        flags.validate()?;

        let format = ImageFormat::of::<P>();
        let desc = MemDesc::image(dims, format);
        let handle = self.allocate(&desc, flags, None)?;

        debug!("Created image {} {} {}", handle.raw(), dims, format);
        Ok(Image::new(MemObject::new(self.device_arc(), handle, desc, flags)))
    }

    /// Create a buffer from host elements
    pub fn init_buffer<P: Pixel>(&self, flags: MemFlags, data: Vec<P>) -> Result<Buffer<P>> {
        if data.is_empty() {
            return Err(Error::InvalidParameter("buffer must hold at least one element".into()));
        }
        flags.validate()?;
        channel::check_layout::<P>()?;

        let desc = MemDesc::buffer(data.len(), ImageFormat::of::<P>());
        let handle = self.allocate(&desc, flags, Some(bytemuck::cast_slice(&data)))?;

        debug!("Created buffer {} with {} elements", handle.raw(), data.len());
        Ok(Buffer::new(MemObject::new(self.device_arc(), handle, desc, flags)))
    }

    /// Create a zero-filled buffer of `len` elements
    pub fn create_buffer<P: Pixel>(&self, flags: MemFlags, len: usize) -> Result<Buffer<P>> {
        if len == 0 {
            return Err(Error::InvalidParameter("buffer must hold at least one element".into()));
        }
        flags.validate()?;
        channel::check_layout::<P>()?;

        let desc = MemDesc::buffer(len, ImageFormat::of::<P>());
        let handle = self.allocate(&desc, flags, None)?;

        debug!("Created buffer {} with {} elements", handle.raw(), len);
        Ok(Buffer::new(MemObject::new(self.device_arc(), handle, desc, flags)))
    }

    fn allocate(&self, desc: &MemDesc, flags: MemFlags, initial: Option<&[u8]>) -> Result<MemHandle> {
        if desc.kind == crate::device::MemKind::Image && !self.device().supports_format(&desc.format) {
            return Err(Error::FormatUnsupported(desc.format));
        }
        self.device().allocate(desc, flags, initial)
    }
}

/// Check that `format` describes host pixels of type `P`
fn check_format<P: Pixel>(format: &ImageFormat) -> Result<()> {
    channel::check_layout::<P>()?;

    if format.channels() != P::CHANNELS {
        return Err(Error::LayoutIncompatible(format!(
            "format {} has {} channels, host pixel has {}",
            format,
            format.channels(),
            P::CHANNELS
        )));
    }

    if format.pixel_size() != std::mem::size_of::<P>() {
        return Err(Error::LayoutIncompatible(format!(
            "format {} is {} bytes per pixel, host pixel is {}",
            format,
            format.pixel_size(),
            std::mem::size_of::<P>()
        )));
    }

    Ok(())
}
