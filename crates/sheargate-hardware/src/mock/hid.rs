//! Mock HID bus with a single card reader.
//!
//! The bus can be plugged and unplugged at will, and cards are presented
//! by pushing raw input reports.

use crate::{
    HardwareError, Result,
    hid::HidDeviceDescriptor,
    traits::{HidPort, HidTransport},
};
use bytes::Bytes;
use sheargate_core::constants::HID_REPORT_SIZE;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

const MOCK_READER_PATH: &str = "mock://hid/reader";

#[derive(Debug)]
struct BusState {
    reader: HidDeviceDescriptor,
    others: Vec<HidDeviceDescriptor>,
    plugged: bool,
    /// Bumped on every unplug so open ports notice they are stale.
    generation: u64,
    reports: VecDeque<Bytes>,
    fail_connects: u32,
    connect_attempts: u32,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<BusState>,
    changed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mock HID transport.
///
/// # Examples
///
/// ```
/// use sheargate_hardware::mock::MockHidBus;
/// use sheargate_hardware::traits::{HidPort, HidTransport};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> sheargate_hardware::Result<()> {
///     let (mut bus, handle) = MockHidBus::new();
///
///     let devices = bus.enumerate().await?;
///     let mut port = bus.open(&devices[0]).await?;
///
///     handle.present_card("A1B2C3");
///     let report = port.read_report(Duration::from_millis(100)).await?;
///     assert_eq!(&report.unwrap()[..6], b"A1B2C3");
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockHidBus {
    shared: Arc<Shared>,
}

impl MockHidBus {
    /// Create a bus with an RDR-6081AKU style reader already plugged in.
    pub fn new() -> (Self, MockHidBusHandle) {
        let reader = HidDeviceDescriptor::new(MOCK_READER_PATH, 0x0c27, 0x3bfa)
            .with_product("RDR-6081AKU")
            .with_manufacturer("RF IDeas")
            .with_serial_number("MOCK-0001");
        Self::with_reader(reader)
    }

    /// Create a bus exposing a custom reader descriptor.
    pub fn with_reader(reader: HidDeviceDescriptor) -> (Self, MockHidBusHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(BusState {
                reader,
                others: Vec::new(),
                plugged: true,
                generation: 0,
                reports: VecDeque::new(),
                fail_connects: 0,
                connect_attempts: 0,
            }),
            changed: Notify::new(),
        });

        (
            Self {
                shared: shared.clone(),
            },
            MockHidBusHandle { shared },
        )
    }
}

impl HidTransport for MockHidBus {
    type Port = MockHidPort;

    async fn enumerate(&mut self) -> Result<Vec<HidDeviceDescriptor>> {
        let state = self.shared.lock();
        let mut devices = state.others.clone();
        if state.plugged {
            devices.push(state.reader.clone());
        }
        Ok(devices)
    }

    async fn open(&mut self, device: &HidDeviceDescriptor) -> Result<MockHidPort> {
        let mut state = self.shared.lock();
        state.connect_attempts += 1;

        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(HardwareError::communication("mock open failure"));
        }

        if !state.plugged || device.path != state.reader.path {
            return Err(HardwareError::not_found(device.path.clone()));
        }

        Ok(MockHidPort {
            shared: self.shared.clone(),
            generation: state.generation,
        })
    }
}

/// Open handle on the mock reader.
#[derive(Debug)]
pub struct MockHidPort {
    shared: Arc<Shared>,
    generation: u64,
}

impl HidPort for MockHidPort {
    async fn read_report(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        let deadline = Instant::now() + timeout;

        loop {
            let changed = self.shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if !state.plugged || state.generation != self.generation {
                    return Err(HardwareError::disconnected(state.reader.path.clone()));
                }
                if let Some(report) = state.reports.pop_front() {
                    return Ok(Some(report));
                }
            }

            tokio::select! {
                _ = &mut changed => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }
}

/// Control handle for a [`MockHidBus`].
#[derive(Debug, Clone)]
pub struct MockHidBusHandle {
    shared: Arc<Shared>,
}

impl MockHidBusHandle {
    /// Attach the reader.
    pub fn plug(&self) {
        self.shared.lock().plugged = true;
        self.shared.changed.notify_waiters();
    }

    /// Detach the reader. Open ports fail on their next read.
    pub fn unplug(&self) {
        {
            let mut state = self.shared.lock();
            state.plugged = false;
            state.generation += 1;
            state.reports.clear();
        }
        self.shared.changed.notify_waiters();
    }

    pub fn is_plugged(&self) -> bool {
        self.shared.lock().plugged
    }

    /// Queue a raw input report. Dropped when the reader is unplugged.
    pub fn push_report(&self, report: impl Into<Bytes>) -> bool {
        let queued = {
            let mut state = self.shared.lock();
            if state.plugged {
                state.reports.push_back(report.into());
            }
            state.plugged
        };
        self.shared.changed.notify_waiters();
        queued
    }

    /// Present a card whose number is sent as ASCII, padded to a full report.
    pub fn present_card(&self, card: &str) -> bool {
        let mut report = vec![0u8; HID_REPORT_SIZE];
        let len = card.len().min(HID_REPORT_SIZE);
        report[..len].copy_from_slice(&card.as_bytes()[..len]);
        self.push_report(report)
    }

    /// Make the next `count` open attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.shared.lock().fail_connects = count;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.shared.lock().connect_attempts
    }

    /// Add an unrelated HID device to the bus.
    pub fn add_device(&self, device: HidDeviceDescriptor) {
        self.shared.lock().others.push(device);
    }
}
