//! Robot firmware daemon entry point.
//!
//! Loads configuration, assembles the cooperative scheduler with its motor,
//! encoder, time and remote-command workers, and runs it until a shutdown
//! signal, a pass limit, or a fault.

mod firmware;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use robot_common::{FirmwareConfig, HwiBackend};
use robot_hwi::{Pin, PinIoMode, PinState};
use robot_runtime::HighSpeedTimer;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::signals::SignalHandler;

/// Robot firmware command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "robotd",
    about = "Cooperative motor/encoder firmware for the urban robot",
    version,
    long_about = None
)]
struct Args {
    /// Path to a firmware configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use simulated pins regardless of the configured backend.
    #[arg(long, short = 's')]
    simulated: bool,

    /// Maximum scheduler passes to run (0 = until signalled).
    #[arg(long, default_value = "0")]
    max_passes: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Print the pin registry and exit.
    #[arg(long)]
    dump_pins: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.dump_pins {
        print!("{}", pin_table());
        return Ok(());
    }

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting robot firmware");

    let mut config = load_config(&args)?;
    if args.simulated {
        config.hwi.backend = HwiBackend::Simulated;
    }
    config.validate().context("Configuration rejected")?;

    info!(
        hst = ?config.hst.backend,
        hwi = ?config.hwi.backend,
        net = ?config.net.backend,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::install().context("Failed to set up signal handlers")?;

    run_firmware(&config, &signal_handler, args.max_passes)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "robotd={level},robot_runtime={level},robot_hwi={level},robot_common={level},robot={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `ROBOT_CONFIG_PATH` environment variable
/// 3. `/etc/urban-robot/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<FirmwareConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return FirmwareConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("ROBOT_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from ROBOT_CONFIG_PATH");
            return FirmwareConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from ROBOT_CONFIG_PATH={env_path}")
            });
        }
        warn!(
            path = %env_path,
            "ROBOT_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/urban-robot/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(candidate);
        if config_path.exists() {
            info!(?config_path, "Loading config");
            return FirmwareConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {candidate}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(FirmwareConfig::default())
}

/// Assemble the firmware and run it until told to stop.
fn run_firmware(
    config: &FirmwareConfig,
    signal_handler: &SignalHandler,
    max_passes: u64,
) -> Result<()> {
    let firmware::Firmware {
        mut scheduler,
        motors,
        encoders,
        clock,
        hst,
    } = firmware::build(config)?;

    scheduler.start().context("Failed to start scheduler")?;

    let mut passes = 0u64;
    let result = scheduler.run(|| {
        if signal_handler.shutdown_requested() {
            info!(signal = ?signal_handler.last_signal(), "Shutdown requested");
            return false;
        }
        if max_passes > 0 && passes >= max_passes {
            info!(passes, "Maximum pass count reached");
            return false;
        }
        passes += 1;
        true
    });

    if let Err(e) = &result {
        error!(error = %e, "Control loop faulted");
    }

    info!("Shutting down...");
    if let Err(e) = scheduler.stop() {
        warn!("Scheduler stop failed: {}", e);
    }

    let lateness = scheduler.metrics().snapshot();
    match serde_json::to_string(&scheduler.command_stats()) {
        Ok(stats) => debug!(commands = %stats, "Per-command statistics"),
        Err(e) => debug!(error = %e, "Could not serialize command statistics"),
    }
    info!(
        passes = scheduler.pass_count(),
        dispatches = lateness.total_dispatches,
        late = lateness.late_count,
        max_lateness_us = ?lateness.max_us,
        motor_timeouts = motors.iter().map(|m| m.timeouts()).sum::<u64>(),
        encoder_ticks = ?encoders.iter().map(|e| e.ticks()).collect::<Vec<_>>(),
        uptime = %HighSpeedTimer::ms_since_device_start(&*hst),
        wall_clock_syncs = clock.sync_count(),
        signals = signal_handler.signal_count(),
        final_state = %scheduler.state(),
        "Firmware shutdown complete"
    );

    result.context("Firmware stopped on a fault")
}

/// Human-readable dump of the pin registry.
fn pin_table() -> String {
    let mut out = String::from("Pins:\n");
    for pin in Pin::ALL {
        out.push_str(&format!(
            "  {:>2}  {:<16} {}\n",
            pin.index(),
            pin.name(),
            pin.config_key()
        ));
    }
    out.push_str("Pin states:\n");
    for state in PinState::ALL {
        out.push_str(&format!("  {:>2}  {}\n", state.index(), state.name()));
    }
    out.push_str("Pin modes:\n");
    for mode in PinIoMode::ALL {
        out.push_str(&format!("  {:>2}  {}\n", mode.index(), mode.name()));
    }
    out
}
