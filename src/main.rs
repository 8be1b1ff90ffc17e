//! # DS4 Bridge
//!
//! Userspace DualShock 4 driver exposing virtual joystick and mouse devices.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use ds4_bridge::config::{Config, DriverConfig, LoggingConfig};
use ds4_bridge::device::discovery::{BluetoothDiscovery, Discovery, HidrawDiscovery};
use ds4_bridge::error::FatalSessionError;
use ds4_bridge::output::layout::LayoutRegistry;
use ds4_bridge::output::uinput::UinputFactory;
use ds4_bridge::supervisor::{discover, Supervisor};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "ds4-bridge", version)]
#[command(about = "Userspace DualShock 4 driver exposing virtual joystick and mouse devices")]
struct Args {
    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use hidraw devices (overrides `[driver] hidraw`)
    #[arg(long, overrides_with = "no_hidraw")]
    hidraw: bool,

    /// Only connect configured Bluetooth addresses
    #[arg(long)]
    no_hidraw: bool,

    /// Log every report as JSON
    #[arg(long)]
    dump_reports: bool,

    /// Skip the rumble and LED animation on connect
    #[arg(long)]
    no_splash: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if self.hidraw {
            config.driver.hidraw = true;
        }
        if self.no_hidraw {
            config.driver.hidraw = false;
        }
        if self.dump_reports {
            config.default.dump_reports = true;
            for controller in &mut config.controllers {
                controller.dump_reports = true;
            }
        }
        if self.no_splash {
            config.default.no_splash = true;
            for options in config.controllers.iter_mut().chain(config.profiles.values_mut()) {
                options.no_splash = true;
            }
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

/// Set up stderr logging plus the optional log file
///
/// `RUST_LOG` takes precedence over the configured level. The returned guard
/// flushes the file writer and must live until exit.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let (file_layer, guard) = match &logging.file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", file))?;

            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn discovery_sources(driver: &DriverConfig) -> Vec<Box<dyn Discovery>> {
    let mut sources: Vec<Box<dyn Discovery>> = Vec::new();
    if driver.hidraw {
        sources.push(Box::new(HidrawDiscovery::default()));
    }
    if !driver.bluetooth_addresses.is_empty() {
        sources.push(Box::new(BluetoothDiscovery::new(driver.bluetooth_addresses.clone())));
    }
    sources
}

/// Scan for controllers until Ctrl+C or a fatal session error
async fn run(supervisor: &mut Supervisor, mut sources: Vec<Box<dyn Discovery>>, period: Duration) -> Result<(), FatalSessionError> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                return Ok(());
            }
        }

        supervisor.reap()?;

        tokio::select! {
            _ = supervisor.wait_for_slot() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                return Ok(());
            }
        }

        let (returned, devices) = discover(sources, supervisor.connected()).await;
        sources = returned;
        for device in devices {
            supervisor.assign(device)?;
        }
    }
}

/// Main entry point for DS4 Bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Parse arguments and load the configuration
///    - Set up logging
///    - Build the joystick layouts and spawn pinned controller sessions
///
/// 2. **Main Loop**
///    - Every scan interval, reap exited sessions and check for fatal errors
///    - Wait for a free slot when `max_devices` is reached
///    - Scan hidraw and Bluetooth for new controllers and hand them out
///
/// 3. **Graceful Shutdown**
///    - Stop every session loop; each cleans up its device
///    - Join the session threads
///
/// # Errors
///
/// Returns error if the configuration is invalid or a session fails fatally
/// (for example when uinput is unavailable).
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };
    args.apply(&mut config);
    let _guard = init_logging(&config.logging)?;

    info!("DS4 Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let layouts = Arc::new(LayoutRegistry::with_mappings(&config.mappings)?);
    let sources = discovery_sources(&config.driver);
    if sources.is_empty() {
        warn!("hidraw is disabled and no Bluetooth addresses are configured, no controller will be found");
    }
    let period = Duration::from_millis(config.driver.scan_interval_ms);

    let mut supervisor = Supervisor::new(Arc::new(config), layouts, Arc::new(UinputFactory));
    let result = match supervisor.start() {
        Ok(()) => run(&mut supervisor, sources, period).await,
        Err(e) => Err(e),
    };
    let shutdown = supervisor.shutdown();

    result?;
    shutdown?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_overrides() {
        let args = Args::parse_from(["ds4-bridge", "--no-hidraw", "--dump-reports", "--no-splash", "-v"]);
        let mut config = Config::from_toml("[[controllers]]\n\n[profiles.racing]\n").unwrap();
        args.apply(&mut config);

        assert!(!config.driver.hidraw);
        assert!(config.default.dump_reports);
        assert!(config.controllers[0].dump_reports);
        assert!(config.default.no_splash);
        assert!(config.controllers[0].no_splash);
        assert!(config.profiles["racing"].no_splash);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_no_flags_keep_config() {
        let args = Args::parse_from(["ds4-bridge"]);
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_discovery_sources() {
        let mut driver = Config::default().driver;
        assert_eq!(discovery_sources(&driver).len(), 1);

        driver.hidraw = false;
        assert!(discovery_sources(&driver).is_empty());

        driver.bluetooth_addresses = vec!["00:11:22:33:44:55".to_string()];
        assert_eq!(discovery_sources(&driver).len(), 1);
    }
}
