//! Typed transfers between host vectors and device memory
//!
//! Every transfer exists in a non-blocking form returning a [`Deferred`] (or
//! an [`Event`] for device-side copies) and a blocking form that submits the
//! non-blocking one and waits on it. Arguments are validated before anything
//! is queued; a rejected call leaves the queue untouched.
//!
//! Ordering between transfers is expressed only through wait lists:
//!
//! ```
//! # fn main() -> warp_accel::Result<()> {
//! use warp_accel::{AccelContext, Dims, MemFlags, Origin};
//!
//! let ctx = AccelContext::new()?;
//! let image = ctx.create_image::<[u8; 4]>(MemFlags::READ_WRITE, Dims::d2(4, 4))?;
//!
//! let written = ctx.write_image_async(&image, vec![[1, 2, 3, 4]; 16], &[])?;
//! let corner = ctx.read_image_region_async(
//!     &image,
//!     Origin::new(2, 2, 0),
//!     Dims::d2(2, 2),
//!     &[written.event().clone()],
//! )?;
//! assert_eq!(corner.wait()?, vec![[1, 2, 3, 4]; 4]);
//! # Ok(())
//! # }
//! ```

use crate::channel::{self, Pixel};
use crate::context::AccelContext;
use crate::deferred::Deferred;
use crate::device::SharedHostMemory;
use crate::event::Event;
use crate::geometry::{Dims, Origin, Region};
use crate::memory::{Buffer, Image, MemObject};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

impl AccelContext {
    /// Queue a read of the whole image
    pub fn read_image_async<P: Pixel>(&self, image: &Image<P>) -> Result<Deferred<Vec<P>>> {
        self.read_image_region_async(image, Origin::ZERO, image.dims(), &[])
    }

    /// Read the whole image
    pub fn read_image<P: Pixel>(&self, image: &Image<P>) -> Result<Vec<P>> {
        self.read_image_async(image)?.wait()
    }

    /// Queue a read of `region` pixels starting at `origin`
    ///
    /// The read starts once every event in `wait` has completed. Pixels are
    /// returned row-major.
    ///
    /// # Errors
    /// - `OutOfBounds` if the region does not fit inside the image
    /// - `AccessDenied` if the image is not host readable
    pub fn read_image_region_async<P: Pixel>(
        &self,
        image: &Image<P>,
        origin: impl Into<Origin>,
        region: impl Into<Dims>,
        wait: &[Event],
    ) -> Result<Deferred<Vec<P>>> {
        let region = Region::new(origin.into(), region.into());
        let scalars = self.read_region::<P::Scalar>(&image.mem, region, P::CHANNELS.count(), wait)?;
        Ok(scalars.and_then(channel::unflatten::<P>))
    }

    /// Read `region` pixels starting at `origin`
    pub fn read_image_region<P: Pixel>(
        &self,
        image: &Image<P>,
        origin: impl Into<Origin>,
        region: impl Into<Dims>,
        wait: &[Event],
    ) -> Result<Vec<P>> {
        self.read_image_region_async(image, origin, region, wait)?.wait()
    }

    /// Queue a read of the whole image as flat scalars
    pub fn read_image_flat_async<P: Pixel>(
        &self,
        image: &Image<P>,
        wait: &[Event],
    ) -> Result<Deferred<Vec<P::Scalar>>> {
        let region = Region::whole(image.dims());
        self.read_region::<P::Scalar>(&image.mem, region, P::CHANNELS.count(), wait)
    }

    /// Read the whole image as flat scalars
    pub fn read_image_flat<P: Pixel>(&self, image: &Image<P>) -> Result<Vec<P::Scalar>> {
        self.read_image_flat_async(image, &[])?.wait()
    }

    /// Queue a write of the whole image
    ///
    /// # Errors
    /// - `DimensionMismatch` if `pixels.len()` differs from the pixel count
    /// - `AccessDenied` if the image is not host writable
    pub fn write_image_async<P: Pixel>(
        &self,
        image: &Image<P>,
        pixels: Vec<P>,
        wait: &[Event],
    ) -> Result<Deferred<()>> {
        self.write_image_region_async(image, Origin::ZERO, image.dims(), pixels, wait)
    }

    /// Write the whole image
    pub fn write_image<P: Pixel>(&self, image: &Image<P>, pixels: Vec<P>) -> Result<()> {
        self.write_image_async(image, pixels, &[])?.wait()
    }

    /// Queue a write of `pixels` into `region` starting at `origin`
    pub fn write_image_region_async<P: Pixel>(
        &self,
        image: &Image<P>,
        origin: impl Into<Origin>,
        region: impl Into<Dims>,
        pixels: Vec<P>,
        wait: &[Event],
    ) -> Result<Deferred<()>> {
        let region = Region::new(origin.into(), region.into());
        region.check_within(&image.dims())?;
        if pixels.len() != region.volume() {
            return Err(Error::dimension_mismatch(region.volume(), pixels.len()));
        }

        let flat = channel::flatten(pixels)?;
        let event = self.write_region(&image.mem, region, P::CHANNELS.count(), flat, wait)?;
        Ok(Deferred::unit(event))
    }

    /// Write `pixels` into `region` starting at `origin`
    pub fn write_image_region<P: Pixel>(
        &self,
        image: &Image<P>,
        origin: impl Into<Origin>,
        region: impl Into<Dims>,
        pixels: Vec<P>,
    ) -> Result<()> {
        self.write_image_region_async(image, origin, region, pixels, &[])?
            .wait()
    }

    /// Queue a write of the whole image from flat scalars
    ///
    /// # Errors
    /// `DimensionMismatch` unless `scalars.len()` is the pixel count times the
    /// channel count
    pub fn write_image_flat_async<P: Pixel>(
        &self,
        image: &Image<P>,
        scalars: Vec<P::Scalar>,
        wait: &[Event],
    ) -> Result<Deferred<()>> {
        let region = Region::whole(image.dims());
        let expected = region.volume() * P::CHANNELS.count();
        if scalars.len() != expected {
            return Err(Error::dimension_mismatch(expected, scalars.len()));
        }

        let event = self.write_region(&image.mem, region, P::CHANNELS.count(), scalars, wait)?;
        Ok(Deferred::unit(event))
    }

    /// Write the whole image from flat scalars
    pub fn write_image_flat<P: Pixel>(&self, image: &Image<P>, scalars: Vec<P::Scalar>) -> Result<()> {
        self.write_image_flat_async(image, scalars, &[])?.wait()
    }

    /// Queue a device-side copy of the leading elements of `buffer` into
    /// the whole of `image`
    ///
    /// Buffer elements are laid into the image row-major.
    ///
    /// # Errors
    /// - `LayoutIncompatible` if channel count or scalar type disagree
    /// - `OutOfBounds` if the buffer holds fewer elements than the image
    pub fn copy_buffer_to_image_async<B: Pixel, I: Pixel>(
        &self,
        buffer: &Buffer<B>,
        image: &Image<I>,
        wait: &[Event],
    ) -> Result<Event> {
        let (src, dst) = (buffer.format(), image.format());
        if src.channels() != dst.channels() {
            return Err(Error::LayoutIncompatible(format!(
                "buffer elements have {} channels, image {} has {}",
                src.channels(),
                dst,
                dst.channels()
            )));
        }
        if src.channel_type != dst.channel_type {
            return Err(Error::LayoutIncompatible(format!(
                "buffer scalars are {}, image {} stores {}",
                src.channel_type, dst, dst.channel_type
            )));
        }

        let needed = image.pixel_count();
        if buffer.len() < needed {
            return Err(Error::out_of_bounds(0, 0, needed, buffer.len()));
        }

        trace!(
            "Copying buffer {} into image {} ({} elements)",
            buffer.handle().raw(),
            image.handle().raw(),
            needed
        );
        self.device().enqueue_copy(
            buffer.handle(),
            Region::whole(Dims::d1(needed)),
            image.handle(),
            Region::whole(image.dims()),
            wait,
        )
    }

    /// Copy the leading elements of `buffer` into `image` and wait
    pub fn copy_buffer_to_image<B: Pixel, I: Pixel>(&self, buffer: &Buffer<B>, image: &Image<I>) -> Result<()> {
        self.copy_buffer_to_image_async(buffer, image, &[])?.wait()?;
        Ok(())
    }

    /// Queue a read of `count` elements starting at `offset`
    ///
    /// # Errors
    /// - `OutOfBounds` if the range exceeds the buffer
    /// - `AccessDenied` if the buffer is not host readable
    pub fn read_buffer_async<P: Pixel>(
        &self,
        buffer: &Buffer<P>,
        offset: usize,
        count: usize,
        wait: &[Event],
    ) -> Result<Deferred<Vec<P>>> {
        let region = Region::new(Origin::new(offset, 0, 0), Dims::d1(count));
        self.read_region::<P>(&buffer.mem, region, 1, wait)
    }

    /// Read the whole buffer
    pub fn read_buffer<P: Pixel>(&self, buffer: &Buffer<P>) -> Result<Vec<P>> {
        self.read_buffer_async(buffer, 0, buffer.len(), &[])?.wait()
    }

    /// Queue a write of `data` starting at element `offset`
    ///
    /// # Errors
    /// - `OutOfBounds` if the data does not fit after `offset`
    /// - `AccessDenied` if the buffer is not host writable
    pub fn write_buffer_async<P: Pixel>(
        &self,
        buffer: &Buffer<P>,
        offset: usize,
        data: Vec<P>,
        wait: &[Event],
    ) -> Result<Deferred<()>> {
        let region = Region::new(Origin::new(offset, 0, 0), Dims::d1(data.len()));
        region.check_within(&Dims::d1(buffer.len()))?;
        let event = self.write_region(&buffer.mem, region, 1, data, wait)?;
        Ok(Deferred::unit(event))
    }

    /// Write `data` starting at element `offset` and wait
    pub fn write_buffer<P: Pixel>(&self, buffer: &Buffer<P>, offset: usize, data: Vec<P>) -> Result<()> {
        self.write_buffer_async(buffer, offset, data, &[])?.wait()
    }

    /// Queue a device to host copy of `region` into a fresh vector of `T`,
    /// `per_element` values per element of `mem`
    fn read_region<T: bytemuck::Pod + Send>(
        &self,
        mem: &MemObject,
        region: Region,
        per_element: usize,
        wait: &[Event],
    ) -> Result<Deferred<Vec<T>>> {
        region.check_within(&mem.desc().dims)?;
        mem.check_host_read()?;

        let host = Arc::new(Mutex::new(bytemuck::zeroed_vec::<T>(region.volume() * per_element)));
        let shared: SharedHostMemory = host.clone();
        let event = self.device().enqueue_read(mem.handle(), region, shared, wait)?;
        trace!("Read of {:?} from {} queued as event {}", region, mem.handle().raw(), event.id());

        Ok(Deferred::new(event, move || {
            // The device drops its reference before signaling completion
            let data = match Arc::try_unwrap(host) {
                Ok(mutex) => mutex.into_inner(),
                Err(shared) => std::mem::take(&mut *shared.lock()),
            };
            Ok(data)
        }))
    }

    /// Queue a host to device copy of `data` into `region`
    fn write_region<T: bytemuck::Pod + Send>(
        &self,
        mem: &MemObject,
        region: Region,
        per_element: usize,
        data: Vec<T>,
        wait: &[Event],
    ) -> Result<Event> {
        region.check_within(&mem.desc().dims)?;
        mem.check_host_write()?;

        let expected = region.volume() * per_element;
        if data.len() != expected {
            return Err(Error::dimension_mismatch(expected, data.len()));
        }

        let shared: SharedHostMemory = Arc::new(Mutex::new(data));
        let event = self.device().enqueue_write(mem.handle(), region, shared, wait)?;
        trace!("Write of {:?} to {} queued as event {}", region, mem.handle().raw(), event.id());
        Ok(event)
    }
}
