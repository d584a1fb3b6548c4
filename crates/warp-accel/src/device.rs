//! Compute runtime abstraction
//!
//! [`ComputeDevice`] is the narrow interface this crate needs from a compute
//! runtime: allocate and release memory objects, queue copies that return an
//! [`Event`], and wait on events. Everything above it (typed images, channel
//! layout, deferred results) is runtime independent.
//!
//! Memory objects are addressed by element. A buffer is a one-dimensional
//! object whose element is one packed pixel; an image is up to three
//! dimensional and stored row-major (x fastest, then y, then z).

use crate::config::QueueOrder;
use crate::event::{self, Event};
use crate::format::ImageFormat;
use crate::geometry::{Dims, Region};
use crate::memory::MemFlags;
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;

/// Opaque handle of a device memory object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemHandle(pub(crate) u64);

impl MemHandle {
    /// Raw handle value
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Kind of memory object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    /// Linear array of elements
    Buffer,
    /// One to three dimensional pixel array
    Image,
}

/// Shape and element layout of a memory object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemDesc {
    /// Buffer or image
    pub kind: MemKind,
    /// Extent in elements
    pub dims: Dims,
    /// Element format
    pub format: ImageFormat,
}

impl MemDesc {
    /// Describe an image
    pub fn image(dims: Dims, format: ImageFormat) -> Self {
        Self { kind: MemKind::Image, dims, format }
    }

    /// Describe a buffer of `len` elements
    pub fn buffer(len: usize, format: ImageFormat) -> Self {
        Self { kind: MemKind::Buffer, dims: Dims::d1(len), format }
    }

    /// Size of one element in bytes
    #[inline]
    pub fn element_size(&self) -> usize {
        self.format.pixel_size()
    }

    /// Total size in bytes, saturating at `usize::MAX`
    pub fn byte_size(&self) -> usize {
        self.checked_byte_size().unwrap_or(usize::MAX)
    }

    /// Total size in bytes, `None` on overflow
    pub fn checked_byte_size(&self) -> Option<usize> {
        self.dims.checked_volume()?.checked_mul(self.element_size())
    }
}

/// Device capabilities
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device name
    pub name: String,
    /// Device memory in bytes
    pub global_mem_size: usize,
    /// Largest image extent per axis
    pub max_image_dims: [usize; 3],
    /// Ordering policy of the device queue
    pub queue_order: QueueOrder,
}

/// Host memory a queued transfer reads from or writes into
///
/// The device holds a reference until the command finishes, so the memory
/// stays valid for the whole transfer regardless of what the caller does.
pub trait HostMemory: Send {
    /// View as bytes
    fn bytes(&self) -> &[u8];

    /// View as mutable bytes
    fn bytes_mut(&mut self) -> &mut [u8];
}

impl<T: bytemuck::Pod + Send> HostMemory for Vec<T> {
    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(self.as_mut_slice())
    }
}

/// Host memory shared between the caller and a queued command
pub type SharedHostMemory = Arc<Mutex<dyn HostMemory>>;

/// Compute runtime interface
///
/// All `enqueue_*` methods validate their arguments, queue the command and
/// return without waiting. The command first waits for every event in `wait`;
/// if any of them failed the command fails with
/// [`DeviceError::DependencyFailed`](crate::DeviceError::DependencyFailed)
/// without running.
pub trait ComputeDevice: Send + Sync {
    /// Device capabilities
    fn info(&self) -> &DeviceInfo;

    /// Whether the device accepts images of `format`
    fn supports_format(&self, format: &ImageFormat) -> bool;

    /// Unallocated device memory in bytes
    fn free_memory(&self) -> usize;

    /// Allocate a memory object, optionally filled from `initial`
    ///
    /// The initial contents are in place when this returns.
    fn allocate(&self, desc: &MemDesc, flags: MemFlags, initial: Option<&[u8]>) -> Result<MemHandle>;

    /// Release a memory object
    ///
    /// Commands already queued against it fail when they run.
    fn release(&self, mem: MemHandle) -> Result<()>;

    /// Queue a host to device copy into `region` of `dst`
    fn enqueue_write(
        &self,
        dst: MemHandle,
        region: Region,
        src: SharedHostMemory,
        wait: &[Event],
    ) -> Result<Event>;

    /// Queue a device to host copy of `region` of `src`
    fn enqueue_read(
        &self,
        src: MemHandle,
        region: Region,
        dst: SharedHostMemory,
        wait: &[Event],
    ) -> Result<Event>;

    /// Queue a device side copy between two memory objects
    ///
    /// Both regions must hold the same number of elements of the same size;
    /// elements are copied in row-major order.
    fn enqueue_copy(
        &self,
        src: MemHandle,
        src_region: Region,
        dst: MemHandle,
        dst_region: Region,
        wait: &[Event],
    ) -> Result<Event>;

    /// Block until every event in `events` has finished
    fn wait_for_events(&self, events: &[Event]) -> Result<()> {
        event::wait_for_events(events)?;
        Ok(())
    }

    /// Block until every queued command has finished
    fn finish(&self) -> Result<()>;
}
