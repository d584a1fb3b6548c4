//! Compute device implementations
//!
//! - `host`: CPU-resident device with an asynchronous command queue

pub mod host;

pub use host::HostDevice;
