//! Typed asynchronous memory transfers for compute accelerators
//!
//! This crate is the host side of a queued compute device:
//! - **Channel layout**: zero-copy reinterpretation between pixel vectors
//!   (`[f32; 3]`, `[u8; 4]`, ...) and flat scalar vectors
//! - **Memory objects**: typed device images and buffers created from host data
//! - **Async transfers**: reads and writes that return a [`Deferred`] result
//!   bound to a completion [`Event`], plus blocking forms built on them
//! - **Device-side copies**: buffer to image without a host round trip
//!
//! # Architecture
//!
//! 1. **Typed surface**: [`AccelContext`] methods take `Image<P>` /
//!    `Buffer<P>` and host vectors of `P`
//! 2. **Layout adapter**: [`flatten`] / [`unflatten`] move between `Vec<P>`
//!    and `Vec<P::Scalar>`
//! 3. **Runtime interface**: [`ComputeDevice`] queues untyped copies and
//!    returns events; [`HostDevice`] implements it on the CPU with an
//!    in-order or out-of-order queue
//!
//! Ordering between commands is expressed only through wait lists. Failures
//! found while validating a call are returned from the call; failures while
//! executing are returned when waiting on the event.
//!
//! # Example
//!
//! ```
//! # fn main() -> warp_accel::Result<()> {
//! use warp_accel::{AccelConfig, AccelContext, Dims, MemFlags};
//!
//! let ctx = AccelContext::with_config(AccelConfig::out_of_order())?;
//!
//! // 2x2 RGB float image
//! let pixels = vec![[0.0f32, 0.5, 1.0]; 4];
//! let image = ctx.init_image(MemFlags::READ_WRITE, Dims::d2(2, 2), pixels.clone())?;
//!
//! // Non-blocking read, consumed once its event completes
//! let pending = ctx.read_image_async(&image)?;
//! assert_eq!(pending.wait()?, pixels);
//!
//! // Flat view of the same data
//! let flat = ctx.read_image_flat(&image)?;
//! assert_eq!(flat.len(), 12);
//! # Ok(())
//! # }
//! ```

#![allow(clippy::field_reassign_with_default)]

pub mod backends;
pub mod channel;
pub mod config;
pub mod context;
pub mod deferred;
pub mod device;
pub mod error;
pub mod event;
pub mod format;
pub mod geometry;
pub mod memory;
pub mod transfer;

pub use backends::HostDevice;
pub use channel::{
    ChannelCount, Channels, FourChan, OneChan, Pixel, PixelOf, Scalar, ThreeChan, TwoChan, flatten,
    flatten_slice, unflatten, unflatten_slice,
};
pub use config::{AccelConfig, QueueOrder};
pub use context::AccelContext;
pub use deferred::Deferred;
pub use device::{ComputeDevice, DeviceInfo, HostMemory, MemDesc, MemHandle, MemKind, SharedHostMemory};
pub use error::{DeviceError, Error, Result};
pub use event::{Event, EventStatus, UserEvent, wait_for_events};
pub use format::{ChannelOrder, ChannelType, ImageFormat};
pub use geometry::{Dims, Origin, Region};
pub use memory::{Buffer, Image, MemFlags};
