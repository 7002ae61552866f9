//! Common types shared by the device adapters.
//!
//! This module defines device metadata and the connection-state model
//! published by every adapter.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{broadcast, watch};
use tracing::info;

const TRANSITION_BUFFER: usize = 32;

/// Generic device information.
///
/// Contains metadata about an attached device such as name, model and
/// serial number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device name (e.g., "RDR-6081AKU", "LabJack U3").
    pub name: String,

    /// Device model or vendor:product identifier.
    pub model: String,

    /// Optional device serial number.
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// Create a new DeviceInfo with required fields.
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            serial_number: None,
        }
    }

    /// Set the serial number.
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }
}

/// Connection state of a supervised device.
///
/// Transitions only follow `Disconnected -> Connecting -> Connected ->
/// Disconnected`, with `Connecting -> Disconnected` when an attempt fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: ConnState) -> bool {
        matches!(
            (self, next),
            (ConnState::Disconnected, ConnState::Connecting)
                | (ConnState::Connecting, ConnState::Connected)
                | (ConnState::Connecting, ConnState::Disconnected)
                | (ConnState::Connected, ConnState::Disconnected)
        )
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Writer side of an adapter's connection state.
///
/// Owned by the adapter task. Readers get a [`ConnectionWatcher`]. Setting
/// the state it already has is a no-op, so a state is never emitted twice
/// in a row.
#[derive(Debug)]
pub struct ConnectionMonitor {
    component: &'static str,
    state: watch::Sender<ConnState>,
    device: watch::Sender<Option<DeviceInfo>>,
    transitions: broadcast::Sender<ConnState>,
}

impl ConnectionMonitor {
    pub fn new(component: &'static str) -> Self {
        let (state, _) = watch::channel(ConnState::Disconnected);
        let (device, _) = watch::channel(None);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);

        Self {
            component,
            state,
            device,
            transitions,
        }
    }

    /// Publish a new state. Returns `false` if it equals the current one.
    pub fn set(&self, next: ConnState) -> bool {
        let mut previous = next;
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = *current;
            *current = next;
            true
        });

        if changed {
            info!(
                component = self.component,
                from = %previous,
                to = %next,
                "Connection state changed"
            );
            // No subscribers is fine
            let _ = self.transitions.send(next);
        }

        changed
    }

    pub fn current(&self) -> ConnState {
        *self.state.borrow()
    }

    pub fn set_device(&self, info: Option<DeviceInfo>) {
        self.device.send_replace(info);
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn watcher(&self) -> ConnectionWatcher {
        ConnectionWatcher {
            state: self.state.subscribe(),
            device: self.device.subscribe(),
            transitions: self.transitions.clone(),
        }
    }
}

/// Read side of an adapter's connection state.
#[derive(Debug, Clone)]
pub struct ConnectionWatcher {
    state: watch::Receiver<ConnState>,
    device: watch::Receiver<Option<DeviceInfo>>,
    transitions: broadcast::Sender<ConnState>,
}

impl ConnectionWatcher {
    /// Latest known connection state. Never blocks.
    pub fn latest(&self) -> ConnState {
        *self.state.borrow()
    }

    /// Device currently attached, if connected.
    pub fn device(&self) -> Option<DeviceInfo> {
        self.device.borrow().clone()
    }

    /// Receive every future transition in order.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnState> {
        self.transitions.subscribe()
    }

    /// Wait until the state differs from the last one seen by this watcher.
    ///
    /// Returns `None` once the adapter is gone.
    pub async fn changed(&mut self) -> Option<ConnState> {
        self.state.changed().await.ok()?;
        Some(*self.state.borrow_and_update())
    }

    /// Wait until the adapter reports `target`.
    ///
    /// Returns `false` if the adapter is gone first.
    pub async fn wait_for(&mut self, target: ConnState) -> bool {
        self.state.wait_for(|state| *state == target).await.is_ok()
    }
}
