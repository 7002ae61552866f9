//! Device layer for the Sheargate access control engine.
//!
//! Two devices sit behind this crate: a USB HID card reader and a LabJack U3
//! acquisition module wired to the door sensor, the unlock relay and the
//! status LEDs. Both are hot-pluggable and both run under the same
//! [`watchdog::Watchdog`], which turns plug, unplug and failures into
//! [`ConnState`] transitions instead of errors.
//!
//! # Layers
//!
//! ```text
//!  reader::CardReader      io_module::IoModule        adapters
//!          │                       │
//!          └────── watchdog ───────┘                  supervision
//!          │                       │
//!  devices::AnyHidTransport  devices::AnyIoTransport  dispatch
//!     │            │            │           │
//!  mock::hid   hidapi_backend  mock::io     u3         backends
//! ```
//!
//! Backends implement the traits in [`traits`] with native `async fn`
//! methods (Rust 1.90 + Edition 2024 RPITIT). Real backends are behind the
//! `hardware-hid` and `hardware-u3` features; the mocks are always built and
//! back both the test suite and the `--simulate` mode of the CLI.
//!
//! # Example
//!
//! ```
//! use sheargate_core::{ReaderConfig, WatchdogConfig};
//! use sheargate_hardware::devices::AnyHidTransport;
//! use sheargate_hardware::mock::MockHidBus;
//! use sheargate_hardware::reader::CardReader;
//! use sheargate_hardware::ConnState;
//! use tokio::sync::mpsc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (bus, bus_handle) = MockHidBus::new();
//!     let (events_tx, mut events_rx) = mpsc::channel(8);
//!     let shutdown = CancellationToken::new();
//!
//!     let reader = CardReader::new(&ReaderConfig::default(), AnyHidTransport::Mock(bus), events_tx)
//!         .start(WatchdogConfig::default(), &shutdown);
//!     reader.watcher().clone().wait_for(ConnState::Connected).await;
//!
//!     bus_handle.present_card("00112345");
//!     let event = events_rx.recv().await.unwrap();
//!     println!("card {}", event.card_id);
//!
//!     reader.stop().await;
//! }
//! ```
//!
//! # Error Handling
//!
//! Every operation returns [`Result<T>`][error::Result] with a
//! [`HardwareError`]. [`HardwareError::is_connection_loss`] separates
//! errors that end a connection from errors that only fail one command.

pub mod backoff;
pub mod devices;
pub mod error;
pub mod hid;
pub mod io_module;
pub mod mock;
pub mod reader;
pub mod traits;
pub mod types;
pub mod watchdog;

#[cfg(feature = "hardware-hid")]
pub mod hidapi_backend;
#[cfg(feature = "hardware-u3")]
pub mod u3;

// Re-export commonly used types for convenience
pub use error::{HardwareError, Result};
pub use io_module::{IoHandle, IoModule, IoModuleTask};
pub use reader::{CardReader, CardReaderHandle};
pub use types::{ConnState, ConnectionMonitor, ConnectionWatcher, DeviceInfo};
