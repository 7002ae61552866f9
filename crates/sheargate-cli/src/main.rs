//! # Sheargate
//!
//! Runs the shear enclosure access controller.
//!
//! # Usage
//!
//! ```bash
//! # Real devices (build with --features hardware-hid,hardware-u3)
//! sheargate run --config /etc/sheargate/sheargate.toml
//!
//! # Mock devices; type a card id, `open`, `close`, `unlock` or `lock` on stdin
//! sheargate run --config sheargate.example.toml --simulate
//!
//! # Validate a configuration file
//! sheargate check-config --config sheargate.example.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sheargate_access::{AllowList, ControlRequest, Engine, EngineHandle, IoControl};
use sheargate_core::{Channel, ChannelValue, EngineConfig};
use sheargate_hardware::devices::{AnyHidTransport, AnyIoTransport};
use sheargate_hardware::mock::{MockHidBus, MockHidBusHandle, MockIoHandle, MockIoModule};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Shear enclosure access controller
#[derive(Parser, Debug)]
#[command(name = "sheargate")]
#[command(version)]
#[command(about = "Card-reader driven access control for shear enclosures")]
struct Cli {
    /// Output logs in JSON format
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the access engine until Ctrl-C
    Run {
        /// Configuration file (TOML)
        #[arg(short, long, env = "SHEARGATE_CONFIG")]
        config: PathBuf,

        /// Use mock devices instead of USB hardware
        #[arg(short, long)]
        simulate: bool,

        /// Seconds between status log lines (0 disables them)
        #[arg(long, default_value_t = 30)]
        status_interval: u64,
    },

    /// Validate a configuration file and exit
    CheckConfig {
        #[arg(short, long, env = "SHEARGATE_CONFIG")]
        config: PathBuf,
    },
}

/// Mock device controls kept alive for the whole run.
struct Simulation {
    reader: MockHidBusHandle,
    io: MockIoHandle,
    door_closed_level: bool,
}

fn main() {
    let cli = Cli::parse();
    setup_tracing(cli.log_json);

    if let Err(e) = run(cli) {
        error!("sheargate failed: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::CheckConfig { config } => check_config(&config),
        Command::Run {
            config,
            simulate,
            status_interval,
        } => {
            let config = load_config(&config)?;
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(run_engine(config, simulate, status_interval))
        }
    }
}

fn setup_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let config: EngineConfig =
        toml::from_str(&content).with_context(|| format!("cannot parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let allow_list = AllowList::from_config(&config.access.cards)?;
    let active = config.access.cards.iter().filter(|card| card.active).count();

    println!(
        "{}: ok ({} cards, {} active, unlock window {} ms)",
        path.display(),
        allow_list.len(),
        active,
        config.access.unlock_window.as_millis()
    );
    Ok(())
}

async fn run_engine(config: EngineConfig, simulate: bool, status_interval: u64) -> Result<()> {
    info!("Sheargate v{} starting", env!("CARGO_PKG_VERSION"));

    let (reader, io, simulation) = if simulate {
        info!("Simulation mode: mock card reader and I/O module");
        let (bus, reader) = MockHidBus::new();
        let (module, io) = MockIoModule::with_pins(config.io_module.pins.clone());
        io.set_digital_input(Channel::DoorSensor, config.io_module.door_closed_level);
        (
            AnyHidTransport::Mock(bus),
            AnyIoTransport::Mock(module),
            Some(Simulation {
                reader,
                io,
                door_closed_level: config.io_module.door_closed_level,
            }),
        )
    } else {
        (reader_transport()?, io_transport()?, None)
    };

    let engine = Engine::new(config, reader, io).start()?;

    if let Some(simulation) = simulation {
        tokio::spawn(drive_simulation(simulation, engine.control().clone()));
    }

    let mut ticker = (status_interval > 0).then(|| {
        let period = Duration::from_secs(status_interval);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Ctrl-C handler failed, stopping");
                }
                info!("Shutdown requested");
                break;
            }
            _ = async { ticker.as_mut()?.tick().await; Some(()) }, if ticker.is_some() => {
                log_status(&engine);
            }
        }
    }

    engine.stop().await;
    info!("Sheargate stopped");
    Ok(())
}

fn log_status(engine: &EngineHandle) {
    let snapshot = engine.status().snapshot();
    info!(
        reader = %snapshot.reader,
        io_module = %snapshot.io_module,
        state = %snapshot.access_state,
        fault = snapshot.fault,
        temperature_c = ?snapshot.temperature_c,
        motion = ?snapshot.motion_detected,
        "Status"
    );

    match serde_json::to_string(&snapshot) {
        Ok(json) => debug!(status = %json, "Status snapshot"),
        Err(e) => warn!(error = %e, "Status snapshot not serializable"),
    }
}

/// Read commands from stdin: a card id, `open`, `close`, `unlock`, `lock`,
/// `unplug-reader`, `plug-reader`, `unplug-io` or `plug-io`.
async fn drive_simulation(simulation: Simulation, control: IoControl) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let door_closed_level = simulation.door_closed_level;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed, simulation input stopped");
                break;
            }
        };

        match line.trim() {
            "" => {}
            "open" => simulation
                .io
                .set_digital_input(Channel::DoorSensor, !door_closed_level),
            "close" => simulation
                .io
                .set_digital_input(Channel::DoorSensor, door_closed_level),
            "unplug-reader" => simulation.reader.unplug(),
            "plug-reader" => simulation.reader.plug(),
            "unplug-io" => simulation.io.disconnect(),
            "plug-io" => simulation.io.reconnect(),
            command @ ("unlock" | "lock") => {
                let energize = command == "unlock";
                let request = ControlRequest::new("unlock_relay", ChannelValue::Digital(energize));
                if let Err(e) = control.apply(request).await {
                    warn!(error = %e, command, "Relay request failed");
                }
            }
            card => {
                if !simulation.reader.present_card(card) {
                    warn!(card, "Reader unplugged, card dropped");
                }
            }
        }
    }
}

#[cfg(feature = "hardware-hid")]
fn reader_transport() -> Result<AnyHidTransport> {
    use sheargate_hardware::hidapi_backend::HidApiTransport;
    let api = HidApiTransport::new().context("cannot initialize hidapi")?;
    Ok(AnyHidTransport::HidApi(api))
}

#[cfg(not(feature = "hardware-hid"))]
fn reader_transport() -> Result<AnyHidTransport> {
    anyhow::bail!("built without the hardware-hid feature; use --simulate")
}

#[cfg(feature = "hardware-u3")]
fn io_transport() -> Result<AnyIoTransport> {
    use sheargate_hardware::u3::U3Transport;
    Ok(AnyIoTransport::U3(U3Transport::new()))
}

#[cfg(not(feature = "hardware-u3"))]
fn io_transport() -> Result<AnyIoTransport> {
    anyhow::bail!("built without the hardware-u3 feature; use --simulate")
}
