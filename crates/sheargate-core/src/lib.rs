//! Shared domain types for the Sheargate access control engine.
//!
//! This crate holds everything the hardware adapters and the access manager
//! need to agree on: card identifiers and card events, access decisions,
//! the logical I/O channel model, weekly access schedules and the engine
//! configuration tree.

pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod schedule;
pub mod types;

pub use channel::{
    Channel, ChannelKind, ChannelReading, ChannelState, ChannelValue, Pin, PinMap,
};
pub use config::{
    AccessConfig, CardEntryConfig, ConfirmPolicy, EngineConfig, IoModuleConfig, ReaderConfig,
    ReportLayout, WatchdogConfig,
};
pub use error::{Error, Result};
pub use schedule::{TimeWindow, WeeklySchedule};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
