//! Error types for hardware operations.
//!
//! Device-layer errors never cross the adapter boundary as panics: the
//! watchdog turns connection failures into state transitions and the I/O
//! command queue hands per-command errors back to the caller that issued
//! the command.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur during hardware device operations.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// No matching device is attached.
    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    /// Device is not connected or has been disconnected.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// A single command exceeded its deadline.
    #[error("Command '{operation}' timed out after {duration_ms}ms")]
    CommandTimeout { operation: String, duration_ms: u64 },

    /// Report bytes could not be turned into a card identifier.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Device answered with a malformed or error response.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Operation is not supported by this device.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Device communication error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Device configuration error.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Channel or value rejected by the domain model.
    #[error(transparent)]
    Core(#[from] sheargate_core::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl HardwareError {
    /// Create a new device-not-found error.
    pub fn not_found(device: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            device: device.into(),
        }
    }

    /// Create a new disconnected error.
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    /// Create a new command timeout error.
    pub fn command_timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::CommandTimeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Create a new decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a new invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new communication error.
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Create a generic error with custom message.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Errors that may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. }
                | Self::CommandTimeout { .. }
                | Self::CommunicationError { .. }
                | Self::Io(_)
        )
    }

    /// Errors that mean the device handle is no longer usable.
    ///
    /// A command timeout is transient but leaves the connection in place;
    /// only the command that hit it fails.
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. }
                | Self::Disconnected { .. }
                | Self::CommunicationError { .. }
                | Self::Io(_)
        )
    }
}
