//! Device watchdog.
//!
//! Both adapters run their device through the same supervision loop: probe
//! for presence, connect, run the device while it stays healthy, and start
//! over when it goes away. Failures never escape the loop; they become
//! connection-state transitions published on a [`ConnectionMonitor`].
//!
//! ```text
//!            probe() == false                connect() / on_connected() Err
//!          ┌──────────────────┐             ┌──────────────────────────────┐
//!          ▼                  │             ▼                              │
//!   ┌──────────────┐  present ┌─────────────┐   Ok   ┌───────────┐         │
//!   │ Disconnected │─────────►│ Connecting  │───────►│ Connected │         │
//!   └──────────────┘          └─────────────┘        └───────────┘         │
//!          ▲                        │ backoff              │ poll() Err    │
//!          └────────────────────────┴──────────────────────┘               │
//!          └───────────────────────────────────────────────────────────────┘
//! ```

#![allow(async_fn_in_trait)]

use crate::{
    HardwareError, Result,
    backoff::Backoff,
    types::{ConnState, ConnectionMonitor, ConnectionWatcher, DeviceInfo},
};
use sheargate_core::WatchdogConfig;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A device driven by the [`Watchdog`].
///
/// The watchdog owns the connection for its whole life: it is created by
/// [`connect`](Self::connect), lent to [`on_connected`](Self::on_connected)
/// and [`poll`](Self::poll), and handed back to
/// [`on_lost`](Self::on_lost) to be dropped.
pub trait Supervised: Send {
    /// Exclusively owned device handle; dropping it closes the device.
    type Connection: Send;

    /// Name used in logs and state-change events.
    fn component(&self) -> &'static str;

    /// Check whether the device is attached.
    async fn probe(&mut self) -> Result<bool>;

    /// Open the device found by the last successful probe.
    async fn connect(&mut self) -> Result<(Self::Connection, DeviceInfo)>;

    /// Bring a fresh connection to a known baseline.
    ///
    /// The device is only reported `Connected` after this succeeds.
    async fn on_connected(&mut self, _conn: &mut Self::Connection) -> Result<()> {
        Ok(())
    }

    /// One unit of connected work. Doubles as the liveness check: an error
    /// means the connection is lost.
    async fn poll(&mut self, conn: &mut Self::Connection) -> Result<()>;

    /// The connection is gone. `error` is `None` on shutdown.
    async fn on_lost(&mut self, conn: Self::Connection, _error: Option<&HardwareError>) {
        drop(conn);
    }

    /// Work to do while no connection exists. Cancelled whenever the
    /// watchdog is ready to probe again.
    async fn while_disconnected(&mut self) {
        std::future::pending::<()>().await
    }
}

/// Supervision loop with exponential reconnect backoff.
///
/// Owns the [`ConnectionMonitor`] of the device it supervises, so it is the
/// only writer of that device's connection state.
#[derive(Debug)]
pub struct Watchdog {
    config: WatchdogConfig,
    monitor: ConnectionMonitor,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig, monitor: ConnectionMonitor) -> Self {
        Self { config, monitor }
    }

    pub fn watcher(&self) -> ConnectionWatcher {
        self.monitor.watcher()
    }

    /// Supervise `device` until `cancel` fires.
    ///
    /// An absent device is probed again every `probe_interval`. A failed
    /// connection attempt, or a connection lost before `stable_after`, waits
    /// with exponential backoff. The backoff only resets once a connection
    /// has stayed up for `stable_after`.
    pub async fn supervise<D: Supervised>(&self, device: &mut D, cancel: &CancellationToken) {
        let monitor = &self.monitor;
        let component = device.component();
        let mut backoff = Backoff::from_config(&self.config);
        info!(component, "Watchdog started");

        while !cancel.is_cancelled() {
            let present = match device.probe().await {
                Ok(present) => present,
                Err(e) => {
                    debug!(component, error = %e, "Probe failed");
                    false
                }
            };

            if !present {
                trace!(component, "Device not present");
                if !Self::idle(device, self.config.probe_interval, cancel).await {
                    break;
                }
                continue;
            }

            monitor.set(ConnState::Connecting);

            let mut conn = match Self::establish(device).await {
                Ok((conn, info)) => {
                    info!(
                        component,
                        device = %info.name,
                        model = %info.model,
                        "Device connected"
                    );
                    monitor.set_device(Some(info));
                    monitor.set(ConnState::Connected);
                    conn
                }
                Err(e) => {
                    monitor.set(ConnState::Disconnected);
                    let delay = backoff.next_delay();
                    warn!(
                        component,
                        error = %e,
                        retry_in = ?delay,
                        "Connection attempt failed"
                    );
                    if !Self::idle(device, delay, cancel).await {
                        break;
                    }
                    continue;
                }
            };

            let connected_at = Instant::now();
            let lost = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    result = device.poll(&mut conn) => {
                        if let Err(e) = result {
                            break Some(e);
                        }
                    }
                }
            };

            match &lost {
                Some(e) => warn!(component, error = %e, "Device lost"),
                None => debug!(component, "Closing device on shutdown"),
            }
            device.on_lost(conn, lost.as_ref()).await;
            monitor.set_device(None);
            monitor.set(ConnState::Disconnected);

            if lost.is_none() {
                break;
            }
            let uptime = connected_at.elapsed();
            if uptime >= self.config.stable_after {
                backoff.reset();
                continue;
            }

            let delay = backoff.next_delay();
            warn!(component, uptime = ?uptime, retry_in = ?delay, "Connection unstable, backing off");
            if !Self::idle(device, delay, cancel).await {
                break;
            }
        }

        monitor.set(ConnState::Disconnected);
        info!(component, "Watchdog stopped");
    }

    async fn establish<D: Supervised>(device: &mut D) -> Result<(D::Connection, DeviceInfo)> {
        let (mut conn, info) = device.connect().await?;
        if let Err(e) = device.on_connected(&mut conn).await {
            device.on_lost(conn, Some(&e)).await;
            return Err(e);
        }
        Ok((conn, info))
    }

    /// Wait `delay` while running the device's disconnected work. Returns
    /// `false` if cancelled.
    async fn idle<D: Supervised>(device: &mut D, delay: Duration, cancel: &CancellationToken) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = &mut sleep => true,
            _ = device.while_disconnected() => {
                // Disconnected work finished early; still honour the delay
                tokio::select! {
                    _ = cancel.cancelled() => false,
                    _ = &mut sleep => true,
                }
            }
        }
    }
}
