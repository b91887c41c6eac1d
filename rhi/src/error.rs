//! Error types for the render hardware interface.

use thiserror::Error;

use crate::types::ResourceStates;

/// Classification of a failed present.
///
/// Presentation failures are only classified for logging. No device
/// recreation is attempted by this crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresentError {
    /// The adapter was removed or the driver crashed.
    #[error("device removed")]
    DeviceRemoved,
    /// The device was reset by the driver.
    #[error("device reset")]
    DeviceReset,
    /// Any other presentation failure.
    #[error("{0}")]
    Other(String),
}

impl PresentError {
    /// Whether this failure means the native device is gone.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::DeviceRemoved | Self::DeviceReset)
    }
}

/// Errors that can occur in the render hardware interface.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphicsError {
    /// Adapter or device initialization failed.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// A native object could not be created.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A count or index fell outside its allowed range.
    #[error("{what} {value} is out of range [{min}, {max}]")]
    OutOfRange {
        what: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    /// A descriptor set cannot hold the requested descriptors.
    #[error("descriptor set full: capacity {capacity}, requested {requested}")]
    DescriptorSetFull { capacity: u32, requested: u32 },

    /// The native validation layer rejected a call.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A barrier's `state_before` did not match the tracked resource state.
    #[error("resource '{resource}' is in state {actual:?}, barrier expected {expected:?}")]
    InvalidResourceState {
        resource: String,
        expected: ResourceStates,
        actual: ResourceStates,
    },

    /// A command was recorded into a closed command list.
    #[error("command list is closed")]
    CommandListClosed,

    /// Presenting the back buffer failed.
    #[error("present failed: {0}")]
    Present(#[from] PresentError),

    /// Out of GPU memory.
    #[error("out of GPU memory")]
    OutOfMemory,

    /// The GPU device was lost.
    #[error("GPU device lost")]
    DeviceLost,

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GraphicsError {
    pub(crate) fn out_of_range(what: &'static str, value: u64, min: u64, max: u64) -> Self {
        Self::OutOfRange {
            what,
            value,
            min,
            max,
        }
    }
}

/// Result alias used throughout the crate.
pub type GraphicsResult<T> = Result<T, GraphicsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InitializationFailed("no adapter".to_string());
        assert_eq!(err.to_string(), "initialization failed: no adapter");

        let err = GraphicsError::out_of_range("descriptor count", 0, 1, 4096);
        assert_eq!(
            err.to_string(),
            "descriptor count 0 is out of range [1, 4096]"
        );
    }

    #[test]
    fn test_present_error_conversion() {
        let err: GraphicsError = PresentError::DeviceRemoved.into();
        assert_eq!(err, GraphicsError::Present(PresentError::DeviceRemoved));
        assert_eq!(err.to_string(), "present failed: device removed");
    }

    #[test]
    fn test_present_error_classification() {
        assert!(PresentError::DeviceRemoved.is_device_lost());
        assert!(PresentError::DeviceReset.is_device_lost());
        assert!(!PresentError::Other("occluded".into()).is_device_lost());
    }
}
