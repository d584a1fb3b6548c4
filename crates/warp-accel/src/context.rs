//! Accelerator context
//!
//! [`AccelContext`] owns the compute device and its command queue. Memory
//! objects and transfers are created through it; see the `memory` and
//! `transfer` modules for those operations.

use crate::backends::HostDevice;
use crate::config::AccelConfig;
use crate::device::{ComputeDevice, DeviceInfo};
use crate::event::Event;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Context for a compute device and its queue
///
/// The context is cheap to clone; clones share the device and queue. Images
/// and buffers keep the device alive on their own, so they may outlive the
/// context they were created from.
#[derive(Clone)]
pub struct AccelContext {
    device: Arc<dyn ComputeDevice>,
    config: AccelConfig,
}

impl AccelContext {
    /// Create a context on the host device with the default configuration
    ///
    /// # Errors
    /// Returns an error if the device queue cannot be started
    pub fn new() -> Result<Self> {
        Self::with_config(AccelConfig::default())
    }

    /// Create a context on the host device
    ///
    /// # Errors
    /// Returns an error if `config` is invalid or the device queue cannot be
    /// started
    pub fn with_config(config: AccelConfig) -> Result<Self> {
        debug!("Initializing host device with {:?}", config);
        let device = HostDevice::with_config(config.clone())?;
        Ok(Self {
            device: Arc::new(device),
            config,
        })
    }

    /// Create a context on an existing device
    pub fn with_device(device: Arc<dyn ComputeDevice>) -> Self {
        let info = device.info();
        info!("Using compute device {} ({} queue)", info.name, info.queue_order);

        let config = AccelConfig {
            device_name: info.name.clone(),
            queue_order: info.queue_order,
            global_mem_size: info.global_mem_size,
            max_image_dims: info.max_image_dims,
            ..Default::default()
        };
        Self { device, config }
    }

    /// The compute device
    #[inline]
    pub fn device(&self) -> &dyn ComputeDevice {
        self.device.as_ref()
    }

    #[inline]
    pub(crate) fn device_arc(&self) -> Arc<dyn ComputeDevice> {
        Arc::clone(&self.device)
    }

    /// Device capabilities
    #[inline]
    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    /// Configuration the context was created with
    #[inline]
    pub fn config(&self) -> &AccelConfig {
        &self.config
    }

    /// Unallocated device memory in bytes
    pub fn free_memory(&self) -> usize {
        self.device.free_memory()
    }

    /// Block until every event in `events` has finished
    ///
    /// # Errors
    /// The first device error among `events`
    pub fn wait_for_events(&self, events: &[Event]) -> Result<()> {
        self.device.wait_for_events(events)
    }

    /// Block until every queued command has finished
    ///
    /// Failed commands report through their own events, not here.
    pub fn finish(&self) -> Result<()> {
        self.device.finish()
    }
}

impl std::fmt::Debug for AccelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccelContext")
            .field("device", &self.device.info().name)
            .field("queue_order", &self.device.info().queue_order)
            .finish()
    }
}
