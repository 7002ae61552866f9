//! Error types for the access engine.

use sheargate_hardware::HardwareError;

/// Result type alias for access engine operations.
pub type Result<T> = std::result::Result<T, AccessError>;

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Configuration rejected at startup.
    #[error(transparent)]
    Config(#[from] sheargate_core::Error),

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}
