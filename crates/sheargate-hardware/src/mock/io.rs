//! Mock acquisition module.
//!
//! Simulates a LabJack-style module at pin level. The control handle speaks
//! in logical channels through the pin map the mock was built with, so tests
//! can flip the door sensor or check the relay without knowing the wiring.

use crate::{
    HardwareError, Result,
    traits::{IoPort, IoTransport},
    types::DeviceInfo,
};
use sheargate_core::{Channel, ChannelValue, Pin, PinMap};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One write performed on the mock, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct IoWrite {
    pub pin: Pin,
    pub channel: Option<Channel>,
    pub value: ChannelValue,
}

#[derive(Debug)]
struct ModuleState {
    attached: bool,
    generation: u64,
    digital: HashMap<Pin, bool>,
    analog_in: HashMap<Pin, f64>,
    analog_out: HashMap<Pin, f64>,
    floating: HashSet<Pin>,
    float_phase: bool,
    writes: Vec<IoWrite>,
    command_delay: Option<Duration>,
    /// Pending write rejections per pin.
    failing_writes: HashMap<Pin, u32>,
    configure_count: u32,
}

impl ModuleState {
    fn take_write_failure(&mut self, pin: Pin) -> bool {
        match self.failing_writes.get_mut(&pin) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
struct Shared {
    pins: PinMap,
    state: Mutex<ModuleState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ModuleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel_of(&self, pin: Pin) -> Option<Channel> {
        self.pins.iter().find(|(_, p)| *p == pin).map(|(c, _)| c)
    }
}

/// Mock acquisition module transport.
///
/// Starts attached, with the door sensor at its closed level (HIGH) and
/// every other input LOW.
#[derive(Debug)]
pub struct MockIoModule {
    shared: Arc<Shared>,
}

impl MockIoModule {
    pub fn new() -> (Self, MockIoHandle) {
        Self::with_pins(PinMap::default())
    }

    pub fn with_pins(pins: PinMap) -> (Self, MockIoHandle) {
        let mut digital = HashMap::new();
        digital.insert(pins.pin(Channel::DoorSensor), true);

        let shared = Arc::new(Shared {
            pins,
            state: Mutex::new(ModuleState {
                attached: true,
                generation: 0,
                digital,
                analog_in: HashMap::new(),
                analog_out: HashMap::new(),
                floating: HashSet::new(),
                float_phase: false,
                writes: Vec::new(),
                command_delay: None,
                failing_writes: HashMap::new(),
                configure_count: 0,
            }),
        });

        (
            Self {
                shared: shared.clone(),
            },
            MockIoHandle { shared },
        )
    }
}

impl IoTransport for MockIoModule {
    type Port = MockIoPort;

    async fn probe(&mut self) -> Result<bool> {
        Ok(self.shared.lock().attached)
    }

    async fn open(&mut self) -> Result<(MockIoPort, DeviceInfo)> {
        let state = self.shared.lock();
        if !state.attached {
            return Err(HardwareError::not_found("mock io module"));
        }

        let port = MockIoPort {
            shared: self.shared.clone(),
            generation: state.generation,
        };
        let info = DeviceInfo::new("Mock I/O Module", "Mock").with_serial_number("MOCK-U3");
        Ok((port, info))
    }
}

/// Open handle on the mock module.
#[derive(Debug)]
pub struct MockIoPort {
    shared: Arc<Shared>,
    generation: u64,
}

impl MockIoPort {
    /// Apply the configured delay, then run `op` if the port is still valid.
    async fn run<T>(&self, op: impl FnOnce(&mut ModuleState) -> T) -> Result<T> {
        let delay = self.shared.lock().command_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.shared.lock();
        if !state.attached || state.generation != self.generation {
            return Err(HardwareError::disconnected("mock io module"));
        }
        Ok(op(&mut state))
    }

    fn record(&self, state: &mut ModuleState, pin: Pin, value: ChannelValue) {
        state.writes.push(IoWrite {
            pin,
            channel: self.shared.channel_of(pin),
            value,
        });
    }
}

impl IoPort for MockIoPort {
    async fn configure(&mut self, _pins: &PinMap) -> Result<()> {
        self.run(|state| state.configure_count += 1).await
    }

    async fn read_digital(&mut self, pin: Pin) -> Result<bool> {
        self.run(|state| {
            if state.floating.contains(&pin) {
                state.float_phase = !state.float_phase;
                state.float_phase
            } else {
                state.digital.get(&pin).copied().unwrap_or(false)
            }
        })
        .await
    }

    async fn write_digital(&mut self, pin: Pin, high: bool) -> Result<()> {
        self.run(|state| {
            if state.take_write_failure(pin) {
                return Err(HardwareError::other(format!("mock write to {pin} rejected")));
            }
            state.digital.insert(pin, high);
            self.record(state, pin, ChannelValue::Digital(high));
            Ok(())
        })
        .await?
    }

    async fn read_analog(&mut self, pin: Pin) -> Result<f64> {
        self.run(|state| state.analog_in.get(&pin).copied().unwrap_or(0.0))
            .await
    }

    async fn write_analog(&mut self, pin: Pin, volts: f64) -> Result<()> {
        self.run(|state| {
            state.analog_out.insert(pin, volts);
            self.record(state, pin, ChannelValue::Analog(volts));
        })
        .await
    }
}

/// Control handle for a [`MockIoModule`].
#[derive(Debug, Clone)]
pub struct MockIoHandle {
    shared: Arc<Shared>,
}

impl MockIoHandle {
    pub fn pins(&self) -> &PinMap {
        &self.shared.pins
    }

    /// Drive a digital input level.
    pub fn set_digital_input(&self, channel: Channel, high: bool) {
        let pin = self.shared.pins.pin(channel);
        let mut state = self.shared.lock();
        state.floating.remove(&pin);
        state.digital.insert(pin, high);
    }

    /// Make a digital input read back inconsistent samples.
    pub fn set_floating(&self, channel: Channel) {
        let pin = self.shared.pins.pin(channel);
        self.shared.lock().floating.insert(pin);
    }

    /// Drive an analog input voltage.
    pub fn set_analog_input(&self, channel: Channel, volts: f64) {
        let pin = self.shared.pins.pin(channel);
        self.shared.lock().analog_in.insert(pin, volts);
    }

    /// Current level of a digital pin.
    pub fn digital_level(&self, channel: Channel) -> Option<bool> {
        let pin = self.shared.pins.pin(channel);
        self.shared.lock().digital.get(&pin).copied()
    }

    pub fn analog_output(&self, channel: Channel) -> Option<f64> {
        let pin = self.shared.pins.pin(channel);
        self.shared.lock().analog_out.get(&pin).copied()
    }

    /// Every write so far, oldest first.
    pub fn writes(&self) -> Vec<IoWrite> {
        self.shared.lock().writes.clone()
    }

    /// Values written to one channel, oldest first.
    pub fn writes_to(&self, channel: Channel) -> Vec<ChannelValue> {
        self.shared
            .lock()
            .writes
            .iter()
            .filter(|w| w.channel == Some(channel))
            .map(|w| w.value)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.shared.lock().writes.clear();
    }

    /// Unplug the module. Open ports fail from now on.
    pub fn disconnect(&self) {
        let mut state = self.shared.lock();
        state.attached = false;
        state.generation += 1;
    }

    /// Plug the module back in.
    pub fn reconnect(&self) {
        self.shared.lock().attached = true;
    }

    pub fn is_attached(&self) -> bool {
        self.shared.lock().attached
    }

    /// Delay every subsequent pin operation.
    pub fn set_command_delay(&self, delay: Option<Duration>) {
        self.shared.lock().command_delay = delay;
    }

    /// Reject the next `count` writes to `channel` without dropping the
    /// connection.
    pub fn fail_next_writes(&self, channel: Channel, count: u32) {
        let pin = self.shared.pins.pin(channel);
        self.shared.lock().failing_writes.insert(pin, count);
    }

    /// Number of times a port was configured (once per connection).
    pub fn configure_count(&self) -> u32 {
        self.shared.lock().configure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_is_recorded_by_channel() {
        let (mut module, handle) = MockIoModule::new();
        let (mut port, _info) = module.open().await.unwrap();

        let relay = handle.pins().pin(Channel::UnlockRelay);
        port.write_digital(relay, true).await.unwrap();
        port.write_digital(relay, false).await.unwrap();

        assert_eq!(
            handle.writes_to(Channel::UnlockRelay),
            vec![ChannelValue::Digital(true), ChannelValue::Digital(false)]
        );
        assert_eq!(handle.digital_level(Channel::UnlockRelay), Some(false));
    }

    #[tokio::test]
    async fn test_door_starts_closed() {
        let (mut module, handle) = MockIoModule::new();
        let (mut port, _) = module.open().await.unwrap();
        let door = handle.pins().pin(Channel::DoorSensor);

        assert!(port.read_digital(door).await.unwrap());
        handle.set_digital_input(Channel::DoorSensor, false);
        assert!(!port.read_digital(door).await.unwrap());
    }

    #[tokio::test]
    async fn test_floating_input_alternates() {
        let (mut module, handle) = MockIoModule::new();
        let (mut port, _) = module.open().await.unwrap();
        let motion = handle.pins().pin(Channel::MotionSensor);
        handle.set_floating(Channel::MotionSensor);

        let a = port.read_digital(motion).await.unwrap();
        let b = port.read_digital(motion).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_disconnect_invalidates_port() {
        let (mut module, handle) = MockIoModule::new();
        let (mut port, _) = module.open().await.unwrap();

        handle.disconnect();
        assert!(!module.probe().await.unwrap());
        assert!(port.read_analog(Pin::Ain(0)).await.is_err());

        handle.reconnect();
        assert!(port.read_analog(Pin::Ain(0)).await.is_err());
        let (mut fresh, _) = module.open().await.unwrap();
        assert!(fresh.read_analog(Pin::Ain(0)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_delay() {
        let (mut module, handle) = MockIoModule::new();
        let (mut port, _) = module.open().await.unwrap();
        handle.set_command_delay(Some(Duration::from_secs(2)));

        let start = tokio::time::Instant::now();
        port.read_analog(Pin::Ain(1)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_rejected_write_keeps_connection() {
        let (mut module, handle) = MockIoModule::new();
        let (mut port, _) = module.open().await.unwrap();
        let relay = handle.pins().pin(Channel::UnlockRelay);
        handle.fail_next_writes(Channel::UnlockRelay, 1);

        let err = port.write_digital(relay, true).await.unwrap_err();
        assert!(!err.is_connection_loss());
        assert!(handle.writes().is_empty());

        port.write_digital(relay, true).await.unwrap();
        assert_eq!(handle.digital_level(Channel::UnlockRelay), Some(true));
    }
}
