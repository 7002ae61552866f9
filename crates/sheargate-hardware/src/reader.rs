//! Card reader adapter.
//!
//! Wraps a HID transport in the [`Watchdog`] and pushes every decoded card
//! read to a single `mpsc` consumer. The adapter never retries a broken read
//! itself: a read error ends the connection and the watchdog takes over.

use crate::{
    DeviceInfo, HardwareError, Result,
    devices::{AnyHidPort, AnyHidTransport},
    hid::{Decoded, HidDeviceDescriptor, ReaderFilter, ReportDecoder},
    traits::{HidPort, HidTransport},
    types::{ConnState, ConnectionMonitor, ConnectionWatcher},
    watchdog::{Supervised, Watchdog},
};
use sheargate_core::{CardEvent, ReaderConfig, WatchdogConfig, constants::COMPONENT_CARD_READER};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Supervised card reader.
///
/// # Examples
///
/// ```
/// use sheargate_core::{ReaderConfig, WatchdogConfig};
/// use sheargate_hardware::devices::AnyHidTransport;
/// use sheargate_hardware::mock::MockHidBus;
/// use sheargate_hardware::reader::CardReader;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() {
///     let (bus, bus_handle) = MockHidBus::new();
///     let (events_tx, mut events_rx) = mpsc::channel(16);
///
///     let reader = CardReader::new(&ReaderConfig::default(), AnyHidTransport::Mock(bus), events_tx);
///     let handle = reader.start(WatchdogConfig::default(), &CancellationToken::new());
///
///     handle.watcher().clone().wait_for(sheargate_hardware::ConnState::Connected).await;
///     bus_handle.present_card("A1B2C3");
///
///     let event = events_rx.recv().await.unwrap();
///     assert_eq!(event.card_id.as_str(), "A1B2C3");
///
///     handle.stop().await;
/// }
/// ```
#[derive(Debug)]
pub struct CardReader {
    transport: AnyHidTransport,
    filter: ReaderFilter,
    decoder: ReportDecoder,
    read_timeout: Duration,
    candidate: Option<HidDeviceDescriptor>,
    events: mpsc::Sender<CardEvent>,
}

impl CardReader {
    pub fn new(
        config: &ReaderConfig,
        transport: AnyHidTransport,
        events: mpsc::Sender<CardEvent>,
    ) -> Self {
        Self {
            transport,
            filter: ReaderFilter::from_config(config),
            decoder: ReportDecoder::new(config.layout),
            read_timeout: config.read_timeout,
            candidate: None,
            events,
        }
    }

    /// Spawn the supervision task.
    ///
    /// The task stops when `parent` is cancelled or when
    /// [`CardReaderHandle::stop`] is called.
    pub fn start(self, watchdog: WatchdogConfig, parent: &CancellationToken) -> CardReaderHandle {
        let watchdog = Watchdog::new(watchdog, ConnectionMonitor::new(COMPONENT_CARD_READER));
        let watcher = watchdog.watcher();
        let cancel = parent.child_token();
        let token = cancel.clone();

        let mut reader = self;
        let task = tokio::spawn(async move {
            watchdog.supervise(&mut reader, &token).await;
        });

        CardReaderHandle {
            watcher,
            cancel,
            task,
        }
    }
}

impl Supervised for CardReader {
    type Connection = AnyHidPort;

    fn component(&self) -> &'static str {
        COMPONENT_CARD_READER
    }

    async fn probe(&mut self) -> Result<bool> {
        let devices = self.transport.enumerate().await?;
        self.candidate = self.filter.select(&devices).cloned();

        if self.candidate.is_none() {
            debug!(
                component = COMPONENT_CARD_READER,
                available = ?devices.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "No matching card reader"
            );
        }

        Ok(self.candidate.is_some())
    }

    async fn connect(&mut self) -> Result<(AnyHidPort, DeviceInfo)> {
        let device = self
            .candidate
            .take()
            .ok_or_else(|| HardwareError::not_found("card reader"))?;

        info!(component = COMPONENT_CARD_READER, device = %device, "Opening card reader");
        let port = self.transport.open(&device).await?;
        Ok((port, device.device_info()))
    }

    async fn on_connected(&mut self, _conn: &mut AnyHidPort) -> Result<()> {
        self.decoder.reset();
        Ok(())
    }

    async fn poll(&mut self, conn: &mut AnyHidPort) -> Result<()> {
        let Some(report) = conn.read_report(self.read_timeout).await? else {
            return Ok(());
        };

        match self.decoder.decode(&report) {
            Ok(Decoded::Card(card_id)) => {
                info!(component = COMPONENT_CARD_READER, card_id = %card_id, "Card read");
                let event = CardEvent::new(card_id, report);
                if self.events.send(event).await.is_err() {
                    warn!(component = COMPONENT_CARD_READER, "Card event consumer is gone");
                }
            }
            Ok(Decoded::Idle | Decoded::Pending) => {
                trace!(component = COMPONENT_CARD_READER, "Report without card");
            }
            Err(e) => {
                let payload: String = report.iter().map(|b| format!("{b:02X}")).collect();
                warn!(
                    component = COMPONENT_CARD_READER,
                    error = %e,
                    payload = %payload,
                    "Dropping unparseable report"
                );
            }
        }

        Ok(())
    }
}

/// Running card reader.
#[derive(Debug)]
pub struct CardReaderHandle {
    watcher: ConnectionWatcher,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CardReaderHandle {
    /// Latest connection state. Never blocks.
    pub fn latest_state(&self) -> ConnState {
        self.watcher.latest()
    }

    /// Every future connection-state transition.
    pub fn subscribe_states(&self) -> broadcast::Receiver<ConnState> {
        self.watcher.subscribe()
    }

    pub fn watcher(&self) -> &ConnectionWatcher {
        &self.watcher
    }

    /// Stop the reader and wait for the device to be closed.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(component = COMPONENT_CARD_READER, error = %e, "Reader task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockHidBus, MockHidBusHandle};

    fn start_reader(
        config: ReaderConfig,
    ) -> (CardReaderHandle, MockHidBusHandle, mpsc::Receiver<CardEvent>) {
        let (bus, bus_handle) = MockHidBus::new();
        let (tx, rx) = mpsc::channel(16);
        let reader = CardReader::new(&config, AnyHidTransport::Mock(bus), tx);
        let handle = reader.start(WatchdogConfig::default(), &CancellationToken::new());
        (handle, bus_handle, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_card_events() {
        let (handle, bus, mut rx) = start_reader(ReaderConfig::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.latest_state(), ConnState::Connected);

        bus.present_card("A1B2C3");
        bus.push_report(vec![0x01u8, 0x30, 0x39]);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.card_id.as_str(), "A1B2C3");
        assert_eq!(second.card_id.as_str(), "00112345");
        assert_eq!(second.raw_payload.as_ref(), &[0x01, 0x30, 0x39]);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_reports_are_dropped() {
        let (handle, bus, mut rx) = start_reader(ReaderConfig::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        bus.push_report(vec![0x07u8]);
        bus.push_report(vec![0u8; 64]);
        bus.present_card("4455");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.card_id.as_str(), "4455");
        assert_eq!(handle.latest_state(), ConnState::Connected);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_device_is_ignored() {
        let config = ReaderConfig {
            vendor_id: Some(0x1111),
            ..ReaderConfig::default()
        };
        let (handle, bus, _rx) = start_reader(config);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(handle.latest_state(), ConnState::Disconnected);
        assert_eq!(bus.connect_attempts(), 0);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unplug_and_replug() {
        let (handle, bus, mut rx) = start_reader(ReaderConfig::default());
        let mut states = handle.subscribe_states();
        tokio::time::sleep(Duration::from_millis(10)).await;

        bus.unplug();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(handle.latest_state(), ConnState::Disconnected);

        bus.plug();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.latest_state(), ConnState::Connected);

        bus.present_card("ZZZZZZ");
        assert_eq!(rx.recv().await.unwrap().card_id.as_str(), "ZZZZZZ");

        let mut seen = Vec::new();
        while let Ok(state) = states.try_recv() {
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                ConnState::Connecting,
                ConnState::Connected,
                ConnState::Disconnected,
                ConnState::Connecting,
                ConnState::Connected,
            ]
        );

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_disconnected() {
        let (handle, _bus, _rx) = start_reader(ReaderConfig::default());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let watcher = handle.watcher().clone();
        handle.stop().await;
        assert_eq!(watcher.latest(), ConnState::Disconnected);
    }
}
