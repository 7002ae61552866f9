use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Card errors
    #[error("Invalid card format: {0}")]
    InvalidCardFormat(String),

    // Channel errors
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Invalid pin: {0}")]
    InvalidPin(String),

    #[error("Invalid value for channel {channel}: {message}")]
    InvalidChannelValue { channel: String, message: String },

    // State errors
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Schedule errors
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing configuration key: {0}")]
    MissingConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
