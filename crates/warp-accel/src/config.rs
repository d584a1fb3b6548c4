//! Device and queue configuration
//!
//! Configuration is loaded with the following priority:
//! 1. Default values
//! 2. TOML document ([`AccelConfig::from_toml_str`])
//! 3. Environment variables ([`AccelConfig::apply_env`])

use crate::format::ImageFormat;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Execution ordering of a command queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrder {
    /// Commands start in submission order, one at a time
    #[default]
    InOrder,
    /// Commands may start in any order once their wait lists are satisfied
    OutOfOrder,
}

impl std::str::FromStr for QueueOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "in_order" | "inorder" => Ok(Self::InOrder),
            "out_of_order" | "outoforder" => Ok(Self::OutOfOrder),
            _ => Err(Error::InvalidParameter(format!("invalid queue order: {s}"))),
        }
    }
}

impl std::fmt::Display for QueueOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueOrder::InOrder => write!(f, "in-order"),
            QueueOrder::OutOfOrder => write!(f, "out-of-order"),
        }
    }
}

/// Configuration for an accelerator context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccelConfig {
    /// Device name reported in [`crate::DeviceInfo`]
    pub device_name: String,

    /// Command queue ordering policy
    pub queue_order: QueueOrder,

    /// Worker threads for an out-of-order queue
    pub worker_threads: usize,

    /// Device memory budget in bytes
    pub global_mem_size: usize,

    /// Largest image extent per axis
    pub max_image_dims: [usize; 3],

    /// Image formats the device accepts, `None` for all
    pub supported_formats: Option<Vec<ImageFormat>>,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            device_name: "warp host device".to_string(),
            queue_order: QueueOrder::InOrder,
            worker_threads: 4,
            global_mem_size: 1024 * 1024 * 1024, // 1 GiB
            max_image_dims: [16384, 16384, 2048],
            supported_formats: None,
        }
    }
}

impl AccelConfig {
    /// Default configuration with an out-of-order queue
    pub fn out_of_order() -> Self {
        Self {
            queue_order: QueueOrder::OutOfOrder,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::InvalidParameter(
                "worker_threads must be > 0".to_string(),
            ));
        }

        if self.global_mem_size == 0 {
            return Err(Error::InvalidParameter(
                "global_mem_size must be > 0".to_string(),
            ));
        }

        if self.max_image_dims.contains(&0) {
            return Err(Error::InvalidParameter(
                "max_image_dims must be > 0 on every axis".to_string(),
            ));
        }

        if let Some(formats) = &self.supported_formats
            && formats.is_empty()
        {
            return Err(Error::InvalidParameter(
                "supported_formats must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AccelConfig = toml::from_str(content)
            .map_err(|e| Error::InvalidParameter(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self)
            .map_err(|e| Error::InvalidParameter(format!("config serialize error: {e}")))
    }

    /// Apply `{prefix}_QUEUE_ORDER`, `{prefix}_WORKER_THREADS` and
    /// `{prefix}_GLOBAL_MEM_SIZE` overrides from the environment
    pub fn apply_env(mut self, prefix: &str) -> Result<Self> {
        if let Ok(val) = std::env::var(format!("{prefix}_QUEUE_ORDER")) {
            self.queue_order = val.parse()?;
        }
        if let Ok(val) = std::env::var(format!("{prefix}_WORKER_THREADS")) {
            self.worker_threads = parse_env_usize(prefix, "WORKER_THREADS", &val)?;
        }
        if let Ok(val) = std::env::var(format!("{prefix}_GLOBAL_MEM_SIZE")) {
            self.global_mem_size = parse_env_usize(prefix, "GLOBAL_MEM_SIZE", &val)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Whether the device accepts `format`
    pub fn supports_format(&self, format: &ImageFormat) -> bool {
        match &self.supported_formats {
            Some(formats) => formats.contains(format),
            None => true,
        }
    }
}

fn parse_env_usize(prefix: &str, key: &str, val: &str) -> Result<usize> {
    val.parse().map_err(|_| {
        Error::InvalidParameter(format!("{prefix}_{key}: expected an integer, got {val:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelOrder, ChannelType};

    #[test]
    fn test_config_validation() {
        let mut config = AccelConfig::default();
        assert!(config.validate().is_ok());

        config.worker_threads = 0;
        assert!(config.validate().is_err());

        let mut config = AccelConfig::default();
        config.max_image_dims = [16, 0, 1];
        assert!(config.validate().is_err());

        let mut config = AccelConfig::default();
        config.supported_formats = Some(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_order_parse() {
        assert_eq!("in_order".parse::<QueueOrder>().unwrap(), QueueOrder::InOrder);
        assert_eq!("out-of-order".parse::<QueueOrder>().unwrap(), QueueOrder::OutOfOrder);
        assert_eq!("OutOfOrder".parse::<QueueOrder>().unwrap(), QueueOrder::OutOfOrder);
        assert!("sideways".parse::<QueueOrder>().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = AccelConfig::from_toml_str(
            r#"
            queue_order = "out_of_order"
            worker_threads = 2
            global_mem_size = 65536

            [[supported_formats]]
            order = "rgba"
            channel_type = "unsigned_int8"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue_order, QueueOrder::OutOfOrder);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.global_mem_size, 65536);
        assert_eq!(config.max_image_dims, AccelConfig::default().max_image_dims);

        let rgba8 = ImageFormat::new(ChannelOrder::Rgba, ChannelType::UnsignedInt8);
        let rgb32f = ImageFormat::new(ChannelOrder::Rgb, ChannelType::Float32);
        assert!(config.supports_format(&rgba8));
        assert!(!config.supports_format(&rgb32f));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(AccelConfig::from_toml_str("worker_threads = \"many\"").is_err());
        assert!(AccelConfig::from_toml_str("worker_threads = 0").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AccelConfig::out_of_order();
        let text = config.to_toml_string().unwrap();
        assert_eq!(AccelConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_env_overrides() {
        // SAFETY: this test owns the WARP_ACCEL_ENVTEST prefix
        unsafe {
            std::env::set_var("WARP_ACCEL_ENVTEST_QUEUE_ORDER", "out_of_order");
            std::env::set_var("WARP_ACCEL_ENVTEST_WORKER_THREADS", "3");
        }

        let config = AccelConfig::default().apply_env("WARP_ACCEL_ENVTEST").unwrap();
        assert_eq!(config.queue_order, QueueOrder::OutOfOrder);
        assert_eq!(config.worker_threads, 3);

        unsafe {
            std::env::set_var("WARP_ACCEL_ENVTEST_GLOBAL_MEM_SIZE", "lots");
        }
        assert!(AccelConfig::default().apply_env("WARP_ACCEL_ENVTEST").is_err());
    }
}
