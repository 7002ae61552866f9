//! Device backend trait definitions.
//!
//! These traits are the seam between the adapters and concrete backends:
//! mock devices for tests and simulation, `hidapi` for card readers and
//! `rusb` for the LabJack U3. A transport discovers and opens devices; the
//! port it returns is the exclusively owned device handle.
//!
//! All traits use native `async fn` methods (Rust 1.90 + Edition 2024 RPITIT),
//! eliminating the need for the `async_trait` macro.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use crate::hid::HidDeviceDescriptor;
use crate::types::DeviceInfo;
use bytes::Bytes;
use sheargate_core::{Pin, PinMap};
use std::time::Duration;

/// Discovery and opening of HID devices.
pub trait HidTransport: Send {
    /// Handle type returned by [`open`](Self::open).
    type Port: HidPort;

    /// List the HID devices currently attached.
    async fn enumerate(&mut self) -> Result<Vec<HidDeviceDescriptor>>;

    /// Open a device for reading input reports.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::DeviceNotFound` if the device vanished, or a
    /// communication error if it cannot be opened.
    async fn open(&mut self, device: &HidDeviceDescriptor) -> Result<Self::Port>;
}

/// An open HID device.
pub trait HidPort: Send {
    /// Read one input report.
    ///
    /// Returns `Ok(None)` when no report arrived within `timeout`. Any error
    /// means the device handle is no longer usable.
    async fn read_report(&mut self, timeout: Duration) -> Result<Option<Bytes>>;
}

/// Discovery and opening of the acquisition module.
pub trait IoTransport: Send {
    /// Handle type returned by [`open`](Self::open).
    type Port: IoPort;

    /// Check whether a module is attached.
    async fn probe(&mut self) -> Result<bool>;

    /// Open the attached module.
    async fn open(&mut self) -> Result<(Self::Port, DeviceInfo)>;
}

/// Pin-level operations on an open acquisition module.
///
/// Channel semantics (debouncing, safe values, caching) live in the
/// adapter; ports only move bits and volts.
pub trait IoPort: Send {
    /// Set pin directions and analog/digital modes for a pin map.
    async fn configure(&mut self, pins: &PinMap) -> Result<()>;

    async fn read_digital(&mut self, pin: Pin) -> Result<bool>;

    async fn write_digital(&mut self, pin: Pin, high: bool) -> Result<()>;

    /// Read an analog input in volts.
    async fn read_analog(&mut self, pin: Pin) -> Result<f64>;

    /// Drive an analog output in volts.
    async fn write_analog(&mut self, pin: Pin, volts: f64) -> Result<()>;
}
