//! Engine wiring.
//!
//! Starts the two device adapters, the sensor sampler and the access
//! manager, and stops them in fail-safe order: the manager first (relocking
//! any active session while the I/O module is still up), then the sampler,
//! then the adapters.

use crate::{
    allow_list::AllowList,
    control::IoControl,
    error::Result,
    manager::{AccessManager, ManagerInputs},
    policy::DeniedAttemptPolicy,
    sampler::Sampler,
    status::StatusAggregator,
};
use sheargate_core::{EngineConfig, constants::COMPONENT_ACCESS_MANAGER};
use sheargate_hardware::{
    CardReader, CardReaderHandle, ConnectionWatcher, IoHandle, IoModule, IoModuleTask,
    devices::{AnyHidTransport, AnyIoTransport},
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CARD_EVENT_CAPACITY: usize = 32;
const COMMAND_CAPACITY: usize = 8;

/// Unstarted engine.
///
/// # Examples
///
/// ```no_run
/// use sheargate_access::Engine;
/// use sheargate_core::EngineConfig;
/// use sheargate_hardware::devices::{AnyHidTransport, AnyIoTransport};
/// use sheargate_hardware::mock::{MockHidBus, MockIoModule};
///
/// # async fn demo(config: EngineConfig) -> sheargate_access::Result<()> {
/// let (bus, _reader) = MockHidBus::new();
/// let (module, _io) = MockIoModule::new();
///
/// let engine = Engine::new(config, AnyHidTransport::Mock(bus), AnyIoTransport::Mock(module));
/// let handle = engine.start()?;
/// println!("{:?}", handle.status().snapshot().access_state);
/// handle.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    reader: AnyHidTransport,
    io: AnyIoTransport,
    policy: Option<Box<dyn DeniedAttemptPolicy>>,
}

impl Engine {
    pub fn new(config: EngineConfig, reader: AnyHidTransport, io: AnyIoTransport) -> Self {
        Self {
            config,
            reader,
            io,
            policy: None,
        }
    }

    pub fn with_denied_policy(mut self, policy: Box<dyn DeniedAttemptPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Validate the configuration and spawn every task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AccessError::Config` when the configuration or the
    /// allow-list is rejected. Nothing is spawned in that case.
    pub fn start(self) -> Result<EngineHandle> {
        let Self {
            config,
            reader,
            io,
            policy,
        } = self;

        config.validate()?;
        let allow_list = AllowList::from_config(&config.access.cards)?;

        let adapters = CancellationToken::new();
        let (io_module, io_handle) = IoModule::new(&config.io_module, io);
        let io_task = io_module.start(config.watchdog.clone(), &adapters);

        let (events_tx, events_rx) = mpsc::channel(CARD_EVENT_CAPACITY);
        let reader = CardReader::new(&config.reader, reader, events_tx)
            .start(config.watchdog.clone(), &adapters);

        let sampler_cancel = CancellationToken::new();
        let (sampler, samples) = Sampler::new(io_handle.clone(), config.access.sample_interval);
        let sampler_task = tokio::spawn(sampler.run(sampler_cancel.clone()));

        let (mut manager, manager_watch) =
            AccessManager::new(&config.access, allow_list, io_handle.clone());
        if let Some(policy) = policy {
            manager = manager.with_policy(policy);
        }
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        let manager_cancel = CancellationToken::new();
        let manager_task = tokio::spawn(manager.run(
            ManagerInputs {
                cards: events_rx,
                commands: commands_rx,
                samples: samples.clone(),
            },
            manager_cancel.clone(),
        ));

        let status = StatusAggregator::new(
            reader.watcher().clone(),
            io_handle.clone(),
            manager_watch,
            samples,
        );

        info!(
            component = COMPONENT_ACCESS_MANAGER,
            cards = config.access.cards.len(),
            unlock_window = ?config.access.unlock_window,
            "Engine started"
        );

        Ok(EngineHandle {
            status,
            control: IoControl::new(io_handle.clone(), commands_tx, config.access.unlock_window),
            io: io_handle,
            manager: Task::new(manager_task, manager_cancel),
            sampler: Task::new(sampler_task, sampler_cancel),
            reader,
            io_task,
        })
    }
}

#[derive(Debug)]
struct Task {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Task {
    fn new(handle: JoinHandle<()>, cancel: CancellationToken) -> Self {
        Self { handle, cancel }
    }

    async fn stop(self, name: &'static str) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(component = name, error = %e, "Task failed");
        }
    }
}

/// Running engine.
#[derive(Debug)]
pub struct EngineHandle {
    status: StatusAggregator,
    control: IoControl,
    io: IoHandle,
    manager: Task,
    sampler: Task,
    reader: CardReaderHandle,
    io_task: IoModuleTask,
}

impl EngineHandle {
    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    pub fn control(&self) -> &IoControl {
        &self.control
    }

    /// Card reader connection state.
    pub fn reader(&self) -> &ConnectionWatcher {
        self.reader.watcher()
    }

    /// Direct access to the I/O command queue.
    pub fn io(&self) -> &IoHandle {
        &self.io
    }

    /// Stop everything. An active session is relocked before the I/O
    /// module is closed.
    pub async fn stop(self) {
        info!(component = COMPONENT_ACCESS_MANAGER, "Engine stopping");

        self.manager.stop(COMPONENT_ACCESS_MANAGER).await;
        self.sampler.stop("sampler").await;
        self.reader.stop().await;
        self.io_task.stop().await;

        info!(component = COMPONENT_ACCESS_MANAGER, "Engine stopped");
    }
}
