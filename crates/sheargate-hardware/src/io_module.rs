//! I/O module adapter.
//!
//! Every read and write from every caller goes through one FIFO command
//! queue, drained by the adapter task one command at a time. The adapter is
//! the only writer of the channel cache; everyone else reads snapshots from
//! a `watch` channel.
//!
//! ```text
//!  IoHandle ──┐
//!  IoHandle ──┼──► mpsc<IoCommand> ──► IoWorker ──► AnyIoPort
//!  IoHandle ──┘         (FIFO)            │
//!                                         ▼
//!                               watch<ChannelState> ──► readers
//! ```
//!
//! On connection the adapter configures the pins, drives every output to its
//! safe value and reads all inputs before reporting `Connected`. While
//! idle it re-reads the inputs every heartbeat interval.

use crate::{
    DeviceInfo, HardwareError, Result,
    devices::{AnyIoPort, AnyIoTransport},
    traits::{IoPort, IoTransport},
    types::{ConnState, ConnectionMonitor, ConnectionWatcher},
    watchdog::{Supervised, Watchdog},
};
use chrono::Utc;
use sheargate_core::{
    Channel, ChannelKind, ChannelState, ChannelValue, IoModuleConfig, Pin, WatchdogConfig,
    constants::{COMPONENT_IO_MODULE, DEBOUNCE_SAMPLES, DEBOUNCE_SAMPLE_SPACING_MS},
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Consecutive heartbeat timeouts tolerated before the module counts as lost.
const MAX_MISSED_HEARTBEATS: u32 = 3;

/// Convert a TMP36 output voltage to degrees Celsius.
///
/// Returns `None` for non-positive voltages (no sensor attached).
///
/// # Examples
///
/// ```
/// use sheargate_hardware::io_module::tmp36_celsius;
///
/// assert_eq!(tmp36_celsius(0.75), Some(25.0));
/// assert_eq!(tmp36_celsius(0.0), None);
/// ```
pub fn tmp36_celsius(volts: f64) -> Option<f64> {
    if !volts.is_finite() || volts <= 0.0 {
        return None;
    }
    Some(((volts - 0.5) * 100.0 * 10.0).round() / 10.0)
}

#[derive(Debug)]
enum IoCommand {
    Read {
        channel: Channel,
        reply: oneshot::Sender<Result<ChannelValue>>,
    },
    Write {
        channel: Channel,
        value: ChannelValue,
        reply: oneshot::Sender<Result<()>>,
    },
    ReadAll {
        reply: oneshot::Sender<Result<ChannelState>>,
    },
}

impl IoCommand {
    fn describe(&self) -> String {
        match self {
            IoCommand::Read { channel, .. } => format!("read {channel}"),
            IoCommand::Write { channel, value, .. } => format!("write {channel}={value}"),
            IoCommand::ReadAll { .. } => "read_all".to_string(),
        }
    }

    fn fail(self, error: HardwareError) {
        // The caller may have given up waiting
        match self {
            IoCommand::Read { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            IoCommand::Write { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            IoCommand::ReadAll { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// Adapter for the acquisition module, ready to be started.
///
/// # Examples
///
/// ```
/// use sheargate_core::{Channel, ChannelValue, IoModuleConfig, WatchdogConfig};
/// use sheargate_hardware::devices::AnyIoTransport;
/// use sheargate_hardware::io_module::IoModule;
/// use sheargate_hardware::mock::MockIoModule;
/// use sheargate_hardware::ConnState;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> sheargate_hardware::Result<()> {
///     let (mock, mock_handle) = MockIoModule::new();
///     let (module, io) = IoModule::new(&IoModuleConfig::default(), AnyIoTransport::Mock(mock));
///     let task = module.start(WatchdogConfig::default(), &CancellationToken::new());
///
///     io.connection().clone().wait_for(ConnState::Connected).await;
///     io.write(Channel::LedBlue, ChannelValue::Digital(true)).await?;
///     assert_eq!(mock_handle.digital_level(Channel::LedBlue), Some(true));
///
///     task.stop().await;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct IoModule {
    worker: IoWorker,
    monitor: ConnectionMonitor,
}

impl IoModule {
    /// Create the adapter and the handle used to talk to it.
    pub fn new(config: &IoModuleConfig, transport: AnyIoTransport) -> (Self, IoHandle) {
        let (commands_tx, commands_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ChannelState::new());
        let monitor = ConnectionMonitor::new(COMPONENT_IO_MODULE);

        let handle = IoHandle {
            commands: commands_tx,
            state: state_rx,
            connection: monitor.watcher(),
            door_closed_level: config.door_closed_level,
        };

        let worker = IoWorker {
            transport,
            config: config.clone(),
            commands: commands_rx,
            commands_open: true,
            state: state_tx,
            heartbeat: None,
            missed_heartbeats: 0,
        };

        (Self { worker, monitor }, handle)
    }

    /// Spawn the supervision task.
    pub fn start(self, watchdog: WatchdogConfig, parent: &CancellationToken) -> IoModuleTask {
        let Self { mut worker, monitor } = self;
        let watchdog = Watchdog::new(watchdog, monitor);
        let cancel = parent.child_token();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            watchdog.supervise(&mut worker, &token).await;
            worker.reject_pending();
        });

        IoModuleTask { cancel, task }
    }
}

/// Running I/O module adapter.
#[derive(Debug)]
pub struct IoModuleTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl IoModuleTask {
    /// Stop the adapter and wait for the device to be closed.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(component = COMPONENT_IO_MODULE, error = %e, "I/O module task failed");
        }
    }
}

#[derive(Debug)]
struct IoWorker {
    transport: AnyIoTransport,
    config: IoModuleConfig,
    commands: mpsc::Receiver<IoCommand>,
    commands_open: bool,
    state: watch::Sender<ChannelState>,
    heartbeat: Option<Interval>,
    missed_heartbeats: u32,
}

impl IoWorker {
    async fn execute(&mut self, port: &mut AnyIoPort, command: IoCommand) -> Result<()> {
        let limit = self.config.command_timeout;
        let operation = command.describe();
        trace!(component = COMPONENT_IO_MODULE, operation = %operation, "Executing command");

        match command {
            IoCommand::Read { channel, reply } => {
                let result = if channel.kind().is_input() {
                    with_timeout(limit, &operation, read_input(port, &self.config, channel)).await
                } else {
                    Ok(self.cached_output(channel))
                };
                if let Ok(value) = &result {
                    self.publish(&[(channel, *value)]);
                }
                self.finish(&operation, reply, result)
            }
            IoCommand::Write {
                channel,
                value,
                reply,
            } => {
                let result =
                    with_timeout(limit, &operation, write_output(port, &self.config, channel, value))
                        .await;
                if result.is_ok() {
                    debug!(component = COMPONENT_IO_MODULE, channel = %channel, value = %value, "Output written");
                    self.publish(&[(channel, value)]);
                }
                self.finish(&operation, reply, result)
            }
            IoCommand::ReadAll { reply } => {
                let result = with_timeout(limit, &operation, read_inputs(port, &self.config))
                    .await
                    .map(|values| {
                        self.publish(&values);
                        self.state.borrow().clone()
                    });
                self.finish(&operation, reply, result)
            }
        }
    }

    /// Answer the caller. Only a lost connection is returned as an error.
    fn finish<T>(
        &self,
        operation: &str,
        reply: oneshot::Sender<Result<T>>,
        result: Result<T>,
    ) -> Result<()> {
        match result {
            Ok(value) => {
                let _ = reply.send(Ok(value));
                Ok(())
            }
            Err(e) if e.is_connection_loss() => {
                let _ = reply.send(Err(HardwareError::disconnected(COMPONENT_IO_MODULE)));
                Err(e)
            }
            Err(e) => {
                warn!(component = COMPONENT_IO_MODULE, operation, error = %e, "Command failed");
                let _ = reply.send(Err(e));
                Ok(())
            }
        }
    }

    async fn heartbeat(&mut self, port: &mut AnyIoPort) -> Result<()> {
        let limit = self.config.command_timeout;
        match with_timeout(limit, "heartbeat", read_inputs(port, &self.config)).await {
            Ok(values) => {
                self.missed_heartbeats = 0;
                self.publish(&values);
                Ok(())
            }
            Err(e @ HardwareError::CommandTimeout { .. }) => {
                self.missed_heartbeats += 1;
                warn!(
                    component = COMPONENT_IO_MODULE,
                    missed = self.missed_heartbeats,
                    "Heartbeat timed out"
                );
                if self.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
                    Err(e)
                } else {
                    Ok(())
                }
            }
            Err(e) => Err(e),
        }
    }

    fn cached_output(&self, channel: Channel) -> ChannelValue {
        self.state
            .borrow()
            .value(channel)
            .or_else(|| channel.safe_value())
            .unwrap_or(ChannelValue::Digital(false))
    }

    fn publish(&self, values: &[(Channel, ChannelValue)]) {
        let now = Utc::now();
        self.state.send_modify(|state| {
            for (channel, value) in values {
                state.update(*channel, *value, now);
            }
        });
    }

    fn drain_queue(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            debug!(component = COMPONENT_IO_MODULE, operation = %command.describe(), "Dropping queued command");
            command.fail(HardwareError::disconnected(COMPONENT_IO_MODULE));
        }
    }

    /// Fail everything still queued once the adapter stops.
    fn reject_pending(&mut self) {
        self.commands.close();
        self.drain_queue();
    }
}

impl Supervised for IoWorker {
    type Connection = AnyIoPort;

    fn component(&self) -> &'static str {
        COMPONENT_IO_MODULE
    }

    async fn probe(&mut self) -> Result<bool> {
        self.transport.probe().await
    }

    async fn connect(&mut self) -> Result<(AnyIoPort, DeviceInfo)> {
        self.transport.open().await
    }

    async fn on_connected(&mut self, port: &mut AnyIoPort) -> Result<()> {
        let limit = self.config.command_timeout;

        with_timeout(limit, "configure", port.configure(&self.config.pins)).await?;

        let mut written = Vec::new();
        for channel in Channel::outputs() {
            if let Some(safe) = channel.safe_value() {
                let operation = format!("baseline {channel}");
                with_timeout(limit, &operation, write_output(port, &self.config, channel, safe))
                    .await?;
                written.push((channel, safe));
            }
        }

        let inputs = with_timeout(limit, "baseline read", read_inputs(port, &self.config)).await?;
        self.publish(&written);
        self.publish(&inputs);

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
        self.missed_heartbeats = 0;

        info!(component = COMPONENT_IO_MODULE, "Baseline established, outputs in safe state");
        Ok(())
    }

    async fn poll(&mut self, port: &mut AnyIoPort) -> Result<()> {
        let period = self.config.heartbeat_interval;
        let heartbeat = self
            .heartbeat
            .get_or_insert_with(|| tokio::time::interval_at(Instant::now() + period, period));

        tokio::select! {
            command = self.commands.recv(), if self.commands_open => match command {
                Some(command) => self.execute(port, command).await,
                None => {
                    self.commands_open = false;
                    Ok(())
                }
            },
            _ = heartbeat.tick() => self.heartbeat(port).await,
        }
    }

    async fn on_lost(&mut self, port: AnyIoPort, _error: Option<&HardwareError>) {
        drop(port);
        self.heartbeat = None;
        self.drain_queue();
    }

    async fn while_disconnected(&mut self) {
        loop {
            if !self.commands_open {
                std::future::pending::<()>().await;
            }
            match self.commands.recv().await {
                Some(command) => {
                    debug!(
                        component = COMPONENT_IO_MODULE,
                        operation = %command.describe(),
                        "Rejecting command while disconnected"
                    );
                    command.fail(HardwareError::disconnected(COMPONENT_IO_MODULE));
                }
                None => self.commands_open = false,
            }
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    operation: &str,
    operation_future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, operation_future).await {
        Ok(result) => result,
        Err(_) => Err(HardwareError::command_timeout(
            operation,
            u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

/// Sample a digital input several times; disagreeing samples mean the input
/// is floating.
async fn read_debounced(port: &mut AnyIoPort, pin: Pin, floating_low: bool) -> Result<bool> {
    let first = port.read_digital(pin).await?;

    for _ in 1..DEBOUNCE_SAMPLES {
        tokio::time::sleep(Duration::from_millis(DEBOUNCE_SAMPLE_SPACING_MS)).await;
        if port.read_digital(pin).await? != first {
            trace!(component = COMPONENT_IO_MODULE, pin = %pin, "Floating input");
            return Ok(!floating_low);
        }
    }

    Ok(first)
}

async fn read_input(
    port: &mut AnyIoPort,
    config: &IoModuleConfig,
    channel: Channel,
) -> Result<ChannelValue> {
    let pin = config.pins.pin(channel);
    match channel.kind() {
        ChannelKind::DigitalInput => read_debounced(port, pin, config.floating_inputs_low)
            .await
            .map(ChannelValue::Digital),
        ChannelKind::AnalogInput => port.read_analog(pin).await.map(ChannelValue::Analog),
        kind => Err(HardwareError::unsupported(format!(
            "reading {channel} ({kind:?}) from the device"
        ))),
    }
}

async fn read_inputs(
    port: &mut AnyIoPort,
    config: &IoModuleConfig,
) -> Result<Vec<(Channel, ChannelValue)>> {
    let mut values = Vec::new();
    for channel in Channel::inputs() {
        values.push((channel, read_input(port, config, channel).await?));
    }
    Ok(values)
}

async fn write_output(
    port: &mut AnyIoPort,
    config: &IoModuleConfig,
    channel: Channel,
    value: ChannelValue,
) -> Result<()> {
    channel.validate_value(value)?;
    let pin = config.pins.pin(channel);
    match value {
        ChannelValue::Digital(high) => port.write_digital(pin, high).await,
        ChannelValue::Analog(volts) => port.write_analog(pin, volts).await,
    }
}

/// Cloneable client of the I/O module adapter.
#[derive(Debug, Clone)]
pub struct IoHandle {
    commands: mpsc::Sender<IoCommand>,
    state: watch::Receiver<ChannelState>,
    connection: ConnectionWatcher,
    door_closed_level: bool,
}

impl IoHandle {
    /// Read one channel through the command queue.
    ///
    /// Inputs are read from the device; outputs return the last written
    /// value.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::Disconnected` when the module is not
    /// connected or is lost while the command is pending, and
    /// `HardwareError::CommandTimeout` when the device does not answer in
    /// time.
    pub async fn read(&self, channel: Channel) -> Result<ChannelValue> {
        self.request(|reply| IoCommand::Read { channel, reply }).await
    }

    /// Write one output channel through the command queue.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read), plus `HardwareError::Core` when the
    /// channel is an input or the value does not fit it.
    pub async fn write(&self, channel: Channel, value: ChannelValue) -> Result<()> {
        self.request(|reply| IoCommand::Write {
            channel,
            value,
            reply,
        })
        .await
    }

    /// Read every input and return the full channel snapshot.
    pub async fn read_all(&self) -> Result<ChannelState> {
        self.request(|reply| IoCommand::ReadAll { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> IoCommand,
    ) -> Result<T> {
        if self.connection.latest() == ConnState::Disconnected {
            return Err(HardwareError::disconnected(COMPONENT_IO_MODULE));
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| HardwareError::disconnected(COMPONENT_IO_MODULE))?;

        response
            .await
            .map_err(|_| HardwareError::disconnected(COMPONENT_IO_MODULE))?
    }

    /// Latest connection state. Never blocks.
    pub fn latest_state(&self) -> ConnState {
        self.connection.latest()
    }

    pub fn connection(&self) -> &ConnectionWatcher {
        &self.connection
    }

    /// Last known value of every channel. Never blocks on the device.
    pub fn channels(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every channel cache update.
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Door position from a snapshot: `Some(true)` when closed.
    pub fn door_closed(&self, state: &ChannelState) -> Option<bool> {
        state
            .digital(Channel::DoorSensor)
            .map(|level| level == self.door_closed_level)
    }

    /// Temperature from the last `temp_ain` reading.
    pub fn temperature_c(&self) -> Option<f64> {
        self.state
            .borrow()
            .analog(Channel::TempAin)
            .and_then(tmp36_celsius)
    }

    pub fn motion_detected(&self) -> Option<bool> {
        self.state.borrow().digital(Channel::MotionSensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockIoHandle, MockIoModule};
    use rstest::rstest;

    struct Fixture {
        io: IoHandle,
        mock: MockIoHandle,
        task: IoModuleTask,
    }

    async fn start(config: IoModuleConfig) -> Fixture {
        let (module, mock) = MockIoModule::with_pins(config.pins.clone());
        let (adapter, io) = IoModule::new(&config, AnyIoTransport::Mock(module));
        let task = adapter.start(WatchdogConfig::default(), &CancellationToken::new());
        assert!(io.connection().clone().wait_for(ConnState::Connected).await);
        Fixture { io, mock, task }
    }

    #[rstest]
    #[case(0.75, Some(25.0))]
    #[case(0.5, Some(0.0))]
    #[case(0.2, Some(-30.0))]
    #[case(0.7234, Some(22.3))]
    #[case(0.0, None)]
    #[case(-0.1, None)]
    fn test_tmp36_conversion(#[case] volts: f64, #[case] expected: Option<f64>) {
        assert_eq!(tmp36_celsius(volts), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_baseline_on_connect() {
        let fx = start(IoModuleConfig::default()).await;

        for channel in Channel::outputs() {
            assert_eq!(fx.mock.writes_to(channel), vec![channel.safe_value().unwrap()]);
        }
        assert_eq!(fx.mock.configure_count(), 1);

        let channels = fx.io.channels();
        assert_eq!(channels.len(), Channel::ALL.len());
        assert_eq!(channels.digital(Channel::DoorSensor), Some(true));
        assert_eq!(channels.digital(Channel::UnlockRelay), Some(false));
        assert_eq!(fx.io.door_closed(&channels), Some(true));

        fx.task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_and_read_back() {
        let fx = start(IoModuleConfig::default()).await;

        fx.io
            .write(Channel::UnlockRelay, ChannelValue::Digital(true))
            .await
            .unwrap();
        assert_eq!(fx.mock.digital_level(Channel::UnlockRelay), Some(true));
        assert_eq!(fx.io.channels().digital(Channel::UnlockRelay), Some(true));
        assert_eq!(
            fx.io.read(Channel::UnlockRelay).await.unwrap(),
            ChannelValue::Digital(true)
        );

        fx.io
            .write(Channel::AnalogOut1, ChannelValue::Analog(2.5))
            .await
            .unwrap();
        assert_eq!(fx.mock.analog_output(Channel::AnalogOut1), Some(2.5));

        fx.task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_write_keeps_connection() {
        let fx = start(IoModuleConfig::default()).await;

        let err = fx
            .io
            .write(Channel::AnalogOut0, ChannelValue::Analog(6.0))
            .await
            .unwrap_err();
        assert!(matches!(err, HardwareError::Core(_)));

        let err = fx
            .io
            .write(Channel::DoorSensor, ChannelValue::Digital(true))
            .await
            .unwrap_err();
        assert!(matches!(err, HardwareError::Core(_)));
        assert_eq!(fx.io.latest_state(), ConnState::Connected);

        fx.task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_analog_and_temperature() {
        let fx = start(IoModuleConfig::default()).await;
        fx.mock.set_analog_input(Channel::TempAin, 0.75);

        assert_eq!(
            fx.io.read(Channel::TempAin).await.unwrap(),
            ChannelValue::Analog(0.75)
        );
        assert_eq!(fx.io.temperature_c(), Some(25.0));

        fx.task.stop().await;
    }

    #[rstest]
    #[case(true, false)]
    #[case(false, true)]
    #[tokio::test(start_paused = true)]
    async fn test_floating_input_resolution(#[case] floating_low: bool, #[case] expected: bool) {
        let config = IoModuleConfig {
            floating_inputs_low: floating_low,
            ..IoModuleConfig::default()
        };
        let fx = start(config).await;
        fx.mock.set_floating(Channel::MotionSensor);

        assert_eq!(
            fx.io.read(Channel::MotionSensor).await.unwrap(),
            ChannelValue::Digital(expected)
        );

        fx.task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout_fails_only_that_command() {
        let fx = start(IoModuleConfig::default()).await;
        fx.mock.set_command_delay(Some(Duration::from_secs(2)));

        let err = fx
            .io
            .write(Channel::LedRed, ChannelValue::Digital(true))
            .await
            .unwrap_err();
        assert!(matches!(err, HardwareError::CommandTimeout { .. }));

        fx.mock.set_command_delay(None);
        assert_eq!(fx.io.latest_state(), ConnState::Connected);
        fx.io
            .write(Channel::LedRed, ChannelValue::Digital(false))
            .await
            .unwrap();

        fx.task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_fails_commands_and_recovers() {
        let fx = start(IoModuleConfig::default()).await;
        let mut states = fx.io.connection().subscribe();

        fx.mock.disconnect();
        let err = fx.io.read(Channel::DoorSensor).await.unwrap_err();
        assert!(matches!(err, HardwareError::Disconnected { .. }));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fx.io.latest_state(), ConnState::Disconnected);

        // fails fast while disconnected
        let err = fx
            .io
            .write(Channel::UnlockRelay, ChannelValue::Digital(false))
            .await
            .unwrap_err();
        assert!(matches!(err, HardwareError::Disconnected { .. }));

        fx.mock.reconnect();
        let mut connection = fx.io.connection().clone();
        assert!(connection.wait_for(ConnState::Connected).await);
        assert_eq!(fx.mock.configure_count(), 2);
        assert!(fx.io.read_all().await.is_ok());

        assert_eq!(states.recv().await.unwrap(), ConnState::Disconnected);
        assert_eq!(states.recv().await.unwrap(), ConnState::Connecting);
        assert_eq!(states.recv().await.unwrap(), ConnState::Connected);

        fx.task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_commands_drained_on_loss() {
        let fx = start(IoModuleConfig::default()).await;
        fx.mock.set_command_delay(Some(Duration::from_millis(500)));

        let mut pending = Vec::new();
        for _ in 0..3 {
            let io = fx.io.clone();
            pending.push(tokio::spawn(async move { io.read(Channel::SpareAin).await }));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        fx.mock.disconnect();

        for task in pending {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, HardwareError::Disconnected { .. }));
        }

        fx.task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_detects_idle_loss() {
        let fx = start(IoModuleConfig::default()).await;

        fx.mock.disconnect();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(fx.io.latest_state(), ConnState::Disconnected);

        fx.task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_refreshes_inputs() {
        let fx = start(IoModuleConfig::default()).await;
        let mut state = fx.io.subscribe_state();
        state.borrow_and_update();

        fx.mock.set_digital_input(Channel::MotionSensor, true);
        state.changed().await.unwrap();
        assert_eq!(fx.io.motion_detected(), Some(true));

        fx.task.stop().await;
    }
}
