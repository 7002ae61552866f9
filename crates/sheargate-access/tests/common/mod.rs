//! Shared harness for engine integration tests.
//!
//! Starts a full [`Engine`] on the mock devices and exposes the mock control
//! handles, so a test can swipe cards, move the door and unplug devices
//! while observing the engine through its public status surface.

#![allow(dead_code)]

use sheargate_access::{AccessState, Engine, EngineHandle, ManagerView};
use sheargate_core::{CardEntryConfig, CardId, Channel, ChannelValue, EngineConfig};
use sheargate_hardware::{
    ConnState,
    devices::{AnyHidTransport, AnyIoTransport},
    mock::{MockHidBus, MockHidBusHandle, MockIoHandle, MockIoModule},
};
use std::time::Duration;

pub const ALLOWED_CARD: &str = "A1B2C3";
pub const SECOND_CARD: &str = "D4E5F6";
pub const UNKNOWN_CARD: &str = "ZZZZZZ";

const WAIT_LIMIT: Duration = Duration::from_secs(30);

pub struct Harness {
    pub engine: EngineHandle,
    pub reader: MockHidBusHandle,
    pub io: MockIoHandle,
}

pub fn config(cards: &[&str]) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.access.cards = cards
        .iter()
        .map(|id| CardEntryConfig::new(CardId::new(id).unwrap()))
        .collect();
    config
}

/// Start an engine on fresh mocks and wait until it is idle with both
/// devices connected. Write history is cleared before returning.
pub async fn start(config: EngineConfig) -> Harness {
    start_with(Engine::new, config).await
}

pub async fn start_with(
    build: impl FnOnce(EngineConfig, AnyHidTransport, AnyIoTransport) -> Engine,
    config: EngineConfig,
) -> Harness {
    let (bus, reader) = MockHidBus::new();
    let (module, io) = MockIoModule::with_pins(config.io_module.pins.clone());

    let engine = build(config, AnyHidTransport::Mock(bus), AnyIoTransport::Mock(module))
        .start()
        .unwrap();

    let mut reader_state = engine.reader().clone();
    let mut io_state = engine.io().connection().clone();
    assert!(reader_state.wait_for(ConnState::Connected).await);
    assert!(io_state.wait_for(ConnState::Connected).await);

    let harness = Harness { engine, reader, io };
    harness.settle().await;
    harness.wait_for_state(AccessState::Idle).await;
    harness.io.clear_writes();
    harness
}

impl Harness {
    pub fn swipe(&self, card: &str) {
        assert!(self.reader.present_card(card));
    }

    pub fn open_door(&self) {
        self.io.set_digital_input(Channel::DoorSensor, false);
    }

    pub fn close_door(&self) {
        self.io.set_digital_input(Channel::DoorSensor, true);
    }

    pub fn state(&self) -> AccessState {
        self.engine.status().access_state()
    }

    pub fn view(&self) -> ManagerView {
        self.engine.status().subscribe_view().borrow().clone()
    }

    /// Let every task run until the runtime is idle again.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    pub async fn wait_for_state(&self, target: AccessState) {
        self.wait_for(|view| view.state == target).await;
    }

    pub async fn wait_for(&self, predicate: impl FnMut(&ManagerView) -> bool) {
        let mut view = self.engine.status().subscribe_view();
        let reached = tokio::time::timeout(WAIT_LIMIT, view.wait_for(predicate))
            .await
            .is_ok_and(|result| result.is_ok());
        assert!(reached, "manager never reached the expected view: {:?}", self.view());
    }

    pub fn relay_writes(&self) -> Vec<ChannelValue> {
        self.io.writes_to(Channel::UnlockRelay)
    }

    pub fn relay_on(&self) -> bool {
        self.io.digital_level(Channel::UnlockRelay) == Some(true)
    }

    pub async fn stop(self) {
        self.engine.stop().await;
    }
}

pub fn on() -> ChannelValue {
    ChannelValue::Digital(true)
}

pub fn off() -> ChannelValue {
    ChannelValue::Digital(false)
}
