//! Error types for accelerator memory operations

use crate::format::ImageFormat;

/// Result type for accelerator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the typed transfer layer
///
/// Validation errors (`DimensionMismatch`, `OutOfBounds`, `LayoutIncompatible`,
/// `AccessDenied`) are raised before anything is submitted to the device.
/// `Allocation` and `FormatUnsupported` come back from creation calls, and
/// `Device` is what a failed completion event reports when waited on.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Host data length disagrees with the declared geometry
    #[error("Dimension mismatch: expected {expected} elements, got {actual}")]
    DimensionMismatch {
        /// Element count implied by the geometry
        expected: usize,
        /// Element count actually supplied
        actual: usize,
    },

    /// Requested region falls outside the memory object
    #[error("Region out of bounds on axis {axis}: origin {origin} + extent {extent} exceeds {limit}")]
    OutOfBounds {
        /// Axis index (0 = x, 1 = y, 2 = z)
        axis: usize,
        /// Region origin along the axis
        origin: usize,
        /// Region extent along the axis
        extent: usize,
        /// Size of the object along the axis
        limit: usize,
    },

    /// Host pixel layout cannot be mapped onto the device representation
    #[error("Layout incompatible: {0}")]
    LayoutIncompatible(String),

    /// Device refused to allocate a memory object
    #[error("Allocation failed ({reason}): {requested} bytes requested, {available} bytes available")]
    Allocation {
        /// Requested size in bytes
        requested: usize,
        /// Remaining device memory in bytes
        available: usize,
        /// Why the request was refused
        reason: String,
    },

    /// Device does not support the image format
    #[error("Image format not supported by device: {0}")]
    FormatUnsupported(ImageFormat),

    /// Host access flags forbid the transfer
    #[error("Host access denied: {0}")]
    AccessDenied(String),

    /// Failure reported by the compute runtime
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Invalid parameter or configuration value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    /// Create a dimension mismatch error
    #[inline]
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create an out-of-bounds error
    #[inline]
    pub fn out_of_bounds(axis: usize, origin: usize, extent: usize, limit: usize) -> Self {
        Self::OutOfBounds { axis, origin, extent, limit }
    }

    /// Create an allocation error
    #[inline]
    pub fn allocation(requested: usize, available: usize, reason: impl Into<String>) -> Self {
        Self::Allocation { requested, available, reason: reason.into() }
    }

    /// True for errors detected before any work reached the device
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::OutOfBounds { .. }
                | Self::LayoutIncompatible(_)
                | Self::AccessDenied(_)
                | Self::InvalidParameter(_)
        )
    }

    /// True for errors that originate in the compute runtime
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::Device(_) | Self::Allocation { .. } | Self::FormatUnsupported(_)
        )
    }
}

/// Failures surfaced by the compute runtime
///
/// These travel inside failed events, so they must be cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// Event handle does not belong to this device
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Memory object handle is unknown or already released
    #[error("Invalid memory object {0}")]
    InvalidMemObject(u64),

    /// Command rejected by the runtime
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// An event in the wait list failed, so this command never ran
    #[error("Dependency failed: {0}")]
    DependencyFailed(String),

    /// Queue was shut down before the command ran
    #[error("Command queue shut down")]
    QueueShutdown,

    /// Command failed while executing on the device
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelOrder, ChannelType};

    #[test]
    fn test_dimension_mismatch_display() {
        let err = Error::dimension_mismatch(48, 47);
        let msg = err.to_string();
        assert!(msg.contains("48"));
        assert!(msg.contains("47"));
        assert!(err.is_validation());
        assert!(!err.is_device_error());
    }

    #[test]
    fn test_out_of_bounds_display() {
        let err = Error::out_of_bounds(1, 2, 4, 4);
        let msg = err.to_string();
        assert!(msg.contains("axis 1"));
        assert!(msg.contains("exceeds 4"));
        assert!(err.is_validation());
    }

    #[test]
    fn test_allocation_error() {
        let err = Error::allocation(1024, 512, "insufficient device memory");
        let msg = err.to_string();
        assert!(msg.contains("1024"));
        assert!(msg.contains("512"));
        assert!(msg.contains("insufficient"));
        assert!(err.is_device_error());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_format_unsupported_display() {
        let err = Error::FormatUnsupported(ImageFormat::new(ChannelOrder::Rgb, ChannelType::UnsignedInt8));
        assert!(err.to_string().contains("RGB"));
        assert!(err.is_device_error());
    }

    #[test]
    fn test_device_error_conversion() {
        let err: Error = DeviceError::InvalidMemObject(7).into();
        assert!(matches!(err, Error::Device(DeviceError::InvalidMemObject(7))));
        assert!(err.to_string().contains("7"));
        assert!(err.is_device_error());
    }

    #[test]
    fn test_all_error_variants_are_non_empty() {
        let errors: Vec<Error> = vec![
            Error::dimension_mismatch(1, 0),
            Error::out_of_bounds(0, 0, 1, 0),
            Error::LayoutIncompatible("test".into()),
            Error::allocation(1, 0, "test"),
            Error::FormatUnsupported(ImageFormat::new(ChannelOrder::R, ChannelType::Float32)),
            Error::AccessDenied("test".into()),
            Error::Device(DeviceError::QueueShutdown),
            Error::InvalidParameter("test".into()),
        ];

        for err in errors {
            let msg = err.to_string();
            assert!(!msg.is_empty(), "Error message should not be empty: {:?}", err);
        }
    }
}
