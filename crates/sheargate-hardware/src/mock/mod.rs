//! Mock device implementations for testing and simulation.
//!
//! Each mock is split into the device side, handed to an adapter, and a
//! cloneable control handle used to plug, unplug and stimulate the device
//! without physical hardware.

pub mod hid;
pub mod io;

// Re-export commonly used types
pub use hid::{MockHidBus, MockHidBusHandle, MockHidPort};
pub use io::{IoWrite, MockIoHandle, MockIoModule, MockIoPort};
