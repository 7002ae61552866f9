//! Read side of the engine.
//!
//! Everything here reads `watch` channels only, so a snapshot never waits on
//! a device or on the access manager loop.

use crate::{
    manager::{ManagerView, ManagerWatch},
    recent::{EventOrder, RecentEvent, RecentEventsLog},
    sampler::SensorSample,
    session::AccessSession,
    state_machine::AccessState,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sheargate_core::ChannelState;
use sheargate_hardware::{ConnState, ConnectionWatcher, DeviceInfo, IoHandle};
use tokio::sync::watch;

/// Point-in-time view of the whole system, ready to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub reader: ConnState,
    pub io_module: ConnState,
    pub access_state: AccessState,
    pub session: Option<AccessSession>,
    pub channels: ChannelState,
    /// Newest first.
    pub recent_events: Vec<RecentEvent>,
    /// Manager in `Error` or I/O module not connected.
    pub fault: bool,
    pub fault_reason: Option<String>,
    pub relock_pending: bool,
    pub temperature_c: Option<f64>,
    pub motion_detected: Option<bool>,
    pub reader_device: Option<DeviceInfo>,
    pub io_device: Option<DeviceInfo>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StatusAggregator {
    reader: ConnectionWatcher,
    io: IoHandle,
    view: watch::Receiver<ManagerView>,
    recent: watch::Receiver<RecentEventsLog>,
    samples: watch::Receiver<SensorSample>,
}

impl StatusAggregator {
    pub fn new(
        reader: ConnectionWatcher,
        io: IoHandle,
        manager: ManagerWatch,
        samples: watch::Receiver<SensorSample>,
    ) -> Self {
        Self {
            reader,
            io,
            view: manager.view,
            recent: manager.recent,
            samples,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let view = self.view.borrow().clone();
        let sample = *self.samples.borrow();
        let io_module = self.io.latest_state();

        StatusSnapshot {
            reader: self.reader.latest(),
            io_module,
            access_state: view.state,
            session: view.session,
            channels: self.io.channels(),
            recent_events: self.recent_events(EventOrder::NewestFirst),
            fault: view.state == AccessState::Error || io_module != ConnState::Connected,
            fault_reason: view.fault_reason,
            relock_pending: view.relock_pending,
            temperature_c: sample.temperature_c,
            motion_detected: sample.motion_detected,
            reader_device: self.reader.device(),
            io_device: self.io.connection().device(),
            generated_at: Utc::now(),
        }
    }

    pub fn recent_events(&self, order: EventOrder) -> Vec<RecentEvent> {
        self.recent.borrow().snapshot(order)
    }

    /// Last known value of every input channel.
    pub fn sensors(&self) -> ChannelState {
        self.io.channels().inputs_only()
    }

    pub fn access_state(&self) -> AccessState {
        self.view.borrow().state
    }

    /// Receiver notified on every manager state change.
    pub fn subscribe_view(&self) -> watch::Receiver<ManagerView> {
        self.view.clone()
    }
}
