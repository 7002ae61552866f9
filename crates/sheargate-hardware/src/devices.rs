//! Enum wrappers for device backend dispatch.
//!
//! Native `async fn` in traits (RPITIT, Edition 2024) is not object-safe,
//! so `Box<dyn HidTransport>` is not an option. These enums provide concrete
//! dispatch instead, and let real backends appear only when their feature
//! flag is enabled.
//!
//! # Examples
//!
//! ```
//! use sheargate_hardware::devices::AnyHidTransport;
//! use sheargate_hardware::mock::MockHidBus;
//!
//! let (bus, _handle) = MockHidBus::new();
//! let transport = AnyHidTransport::Mock(bus);
//! ```

use crate::hid::HidDeviceDescriptor;
use crate::mock::{MockHidBus, MockHidPort, MockIoModule, MockIoPort};
use crate::traits::{HidPort, HidTransport, IoPort, IoTransport};
use crate::{DeviceInfo, Result};
use bytes::Bytes;
use sheargate_core::{Pin, PinMap};
use std::time::Duration;

#[cfg(feature = "hardware-hid")]
use crate::hidapi_backend::{HidApiPort, HidApiTransport};
#[cfg(feature = "hardware-u3")]
use crate::u3::{U3Port, U3Transport};

/// Card reader transport.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyHidTransport {
    /// Simulated bus for tests and `--simulate`.
    Mock(MockHidBus),
    /// USB HID through `hidapi`.
    #[cfg(feature = "hardware-hid")]
    HidApi(HidApiTransport),
}

/// Open card reader.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyHidPort {
    Mock(MockHidPort),
    #[cfg(feature = "hardware-hid")]
    HidApi(HidApiPort),
}

impl HidTransport for AnyHidTransport {
    type Port = AnyHidPort;

    async fn enumerate(&mut self) -> Result<Vec<HidDeviceDescriptor>> {
        match self {
            Self::Mock(bus) => bus.enumerate().await,
            #[cfg(feature = "hardware-hid")]
            Self::HidApi(api) => api.enumerate().await,
        }
    }

    async fn open(&mut self, device: &HidDeviceDescriptor) -> Result<AnyHidPort> {
        match self {
            Self::Mock(bus) => bus.open(device).await.map(AnyHidPort::Mock),
            #[cfg(feature = "hardware-hid")]
            Self::HidApi(api) => api.open(device).await.map(AnyHidPort::HidApi),
        }
    }
}

impl HidPort for AnyHidPort {
    async fn read_report(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        match self {
            Self::Mock(port) => port.read_report(timeout).await,
            #[cfg(feature = "hardware-hid")]
            Self::HidApi(port) => port.read_report(timeout).await,
        }
    }
}

/// Acquisition module transport.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyIoTransport {
    /// Simulated module for tests and `--simulate`.
    Mock(MockIoModule),
    /// LabJack U3 over USB through `rusb`.
    #[cfg(feature = "hardware-u3")]
    U3(U3Transport),
}

/// Open acquisition module.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyIoPort {
    Mock(MockIoPort),
    #[cfg(feature = "hardware-u3")]
    U3(U3Port),
}

impl IoTransport for AnyIoTransport {
    type Port = AnyIoPort;

    async fn probe(&mut self) -> Result<bool> {
        match self {
            Self::Mock(module) => module.probe().await,
            #[cfg(feature = "hardware-u3")]
            Self::U3(u3) => u3.probe().await,
        }
    }

    async fn open(&mut self) -> Result<(AnyIoPort, DeviceInfo)> {
        match self {
            Self::Mock(module) => {
                let (port, info) = module.open().await?;
                Ok((AnyIoPort::Mock(port), info))
            }
            #[cfg(feature = "hardware-u3")]
            Self::U3(u3) => {
                let (port, info) = u3.open().await?;
                Ok((AnyIoPort::U3(port), info))
            }
        }
    }
}

impl IoPort for AnyIoPort {
    async fn configure(&mut self, pins: &PinMap) -> Result<()> {
        match self {
            Self::Mock(port) => port.configure(pins).await,
            #[cfg(feature = "hardware-u3")]
            Self::U3(port) => port.configure(pins).await,
        }
    }

    async fn read_digital(&mut self, pin: Pin) -> Result<bool> {
        match self {
            Self::Mock(port) => port.read_digital(pin).await,
            #[cfg(feature = "hardware-u3")]
            Self::U3(port) => port.read_digital(pin).await,
        }
    }

    async fn write_digital(&mut self, pin: Pin, high: bool) -> Result<()> {
        match self {
            Self::Mock(port) => port.write_digital(pin, high).await,
            #[cfg(feature = "hardware-u3")]
            Self::U3(port) => port.write_digital(pin, high).await,
        }
    }

    async fn read_analog(&mut self, pin: Pin) -> Result<f64> {
        match self {
            Self::Mock(port) => port.read_analog(pin).await,
            #[cfg(feature = "hardware-u3")]
            Self::U3(port) => port.read_analog(pin).await,
        }
    }

    async fn write_analog(&mut self, pin: Pin, volts: f64) -> Result<()> {
        match self {
            Self::Mock(port) => port.write_analog(pin, volts).await,
            #[cfg(feature = "hardware-u3")]
            Self::U3(port) => port.write_analog(pin, volts).await,
        }
    }
}
