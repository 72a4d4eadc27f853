//! zonefan daemon (zonefand)
//!
//! Drives the IPMI fan zones of a server from CPU, disk and GPU temperatures.
//!
//! # Exit codes
//! - `0`: clean shutdown, help or version text
//! - `2`: invalid command line
//! - `5`: logging could not be initialized
//! - `6`: configuration error
//! - `7`: missing runtime dependency
//! - `8`: IPMI initialization error
//! - `10`: no zone is enabled

mod control;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc::{self, Sender};

use clap::Parser;
use tracing::{debug, error, info, warn};

use zf_core::constants::{paths, CONFIG_LOG_TARGET};
use zf_core::system::check_system_dependencies;
use zf_core::{build_zones, load_config, ActuatorSink, FanMode, Ipmi};
use zf_error::ZoneFanError;

use control::{restore_full_speed, ControlLoop};
use logging::LogOutput;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitStatus {
    Success = 0,
    Logging = 5,
    Config = 6,
    Dependency = 7,
    Ipmi = 8,
    NoZones = 10,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

#[derive(Parser, Debug)]
#[command(name = "zonefand")]
#[command(version)]
#[command(about = "IPMI zone fan control daemon")]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", default_value = paths::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level: 0-NONE, 1-ERROR, 2-CONFIG, 3-INFO, 4-DEBUG
    #[arg(short = 'l', long = "log-level", default_value_t = 1,
          value_parser = clap::value_parser!(u8).range(0..=4))]
    log_level: u8,

    /// Log output: 0-stdout, 1-stderr, 2-journald
    #[arg(short = 'o', long = "log-output", default_value_t = 2,
          value_parser = clap::value_parser!(u8).range(0..=2))]
    log_output: u8,
}

/// Warn when not running as root, ipmitool and smartctl will fail
fn check_privileges() {
    // SAFETY: geteuid has no preconditions and only returns the effective user id.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!("Running as euid={}, IPMI and smartctl commands need root", euid);
    }
}

/// Status a startup error maps to
fn exit_status_for(err: &ZoneFanError) -> ExitStatus {
    match err {
        ZoneFanError::Dependency(_) => ExitStatus::Dependency,
        ZoneFanError::Ipmi(_) | ZoneFanError::InvalidFanMode(_) => ExitStatus::Ipmi,
        _ => ExitStatus::Config,
    }
}

/// Load config, check dependencies and bring up IPMI in FULL mode
fn start_ipmi(cli: &Cli) -> Result<(zf_core::DaemonConfig, Ipmi), ExitStatus> {
    let config = load_config(&cli.config).map_err(|e| {
        if e.is_config_error() {
            error!("Invalid configuration in {}: {}", cli.config.display(), e);
        } else {
            error!("Cannot load configuration file ({}): {}", cli.config.display(), e);
        }
        ExitStatus::Config
    })?;
    debug!("Configuration file ({}) loaded", cli.config.display());

    check_system_dependencies(&config).map_err(|e| {
        error!("{}", e);
        exit_status_for(&e)
    })?;

    let mut ipmi = Ipmi::new(config.ipmi.clone());
    let old_mode = ipmi.verify().and_then(|_| ipmi.get_fan_mode()).map_err(|e| {
        error!("IPMI initialization failed: {}", e);
        ExitStatus::Ipmi
    })?;
    debug!("Old IPMI fan mode = {}", old_mode);

    if old_mode != FanMode::Full {
        ipmi.set_fan_mode(FanMode::Full).map_err(|e| {
            error!("Cannot switch IPMI fan mode to {}: {}", FanMode::Full, e);
            ExitStatus::Ipmi
        })?;
        debug!("New IPMI fan mode = {}", FanMode::Full);
    }

    Ok((config, ipmi))
}

/// Send on `tx` when SIGINT, SIGTERM or SIGHUP arrives
fn install_shutdown_handler(tx: Sender<()>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        info!("SIGNAL: Received termination signal - initiating shutdown");
        let _ = tx.send(());
    })
}

/// Build the zones and run them until shutdown
fn run_zones(config: &zf_core::DaemonConfig, ipmi: &mut dyn ActuatorSink) -> ExitStatus {
    let zones = match build_zones(config) {
        Ok(zones) => zones,
        Err(e) => {
            error!("{}", e);
            return exit_status_for(&e);
        }
    };
    if zones.is_empty() {
        error!("None of the fan controllers are enabled, service terminated.");
        return ExitStatus::NoZones;
    }
    for zone in &zones {
        debug!("{} fan controller enabled", zone.name());
    }

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    if let Err(e) = install_shutdown_handler(shutdown_tx.clone()) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    let mut control = ControlLoop::new(zones);
    info!("zonefand {} started with {} zone(s)", VERSION, control.zone_count());
    control.run(ipmi, &shutdown_rx);
    drop(shutdown_tx);

    ExitStatus::Success
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let output = match LogOutput::try_from(cli.log_output)
        .and_then(|output| logging::init(cli.log_level, output))
    {
        Ok(output) => output,
        Err(e) => {
            eprintln!("ERROR: {e:#}.");
            return ExitStatus::Logging.into();
        }
    };

    info!(target: CONFIG_LOG_TARGET, "Command line arguments:");
    info!(target: CONFIG_LOG_TARGET, "   original arguments: {}", std::env::args().collect::<Vec<_>>().join(" "));
    info!(target: CONFIG_LOG_TARGET, "   parsed config file = {}", cli.config.display());
    info!(target: CONFIG_LOG_TARGET, "   parsed log level = {}", cli.log_level);
    info!(target: CONFIG_LOG_TARGET, "   parsed log output = {:?}", output);

    check_privileges();

    let (config, mut ipmi) = match start_ipmi(&cli) {
        Ok(started) => started,
        Err(status) => return status.into(),
    };

    let status = run_zones(&config, &mut ipmi);
    restore_full_speed(&mut ipmi);
    info!("zonefand terminated");
    status.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["zonefand"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(paths::DEFAULT_CONFIG_FILE));
        assert_eq!(cli.log_level, 1);
        assert_eq!(cli.log_output, 2);
    }

    #[test]
    fn test_cli_ranges() {
        let cli = Cli::try_parse_from(["zonefand", "-c", "/tmp/z.json", "-l", "4", "-o", "0"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/z.json"));
        assert_eq!(cli.log_level, 4);
        assert!(Cli::try_parse_from(["zonefand", "-l", "5"]).is_err());
        assert!(Cli::try_parse_from(["zonefand", "-o", "3"]).is_err());
    }

    #[test]
    fn test_sigterm_requests_shutdown() {
        let (tx, rx) = mpsc::channel();
        install_shutdown_handler(tx).unwrap();

        // SAFETY: raise only delivers a signal to this process, the handler is installed.
        assert_eq!(unsafe { libc::raise(libc::SIGTERM) }, 0);
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(2)), Ok(()));
    }

    #[test]
    fn test_exit_status_mapping() {
        assert_eq!(exit_status_for(&ZoneFanError::Dependency("x".into())), ExitStatus::Dependency);
        let unreadable = zf_core::system::read_proc_modules(std::path::Path::new("/nonexistent/modules"))
            .unwrap_err();
        assert_eq!(exit_status_for(&unreadable), ExitStatus::Dependency);
        assert_eq!(exit_status_for(&ZoneFanError::ipmi("x")), ExitStatus::Ipmi);
        assert_eq!(exit_status_for(&ZoneFanError::HardwareNotFound("x".into())), ExitStatus::Config);
        assert_eq!(ExitStatus::NoZones as u8, 10);
        assert_eq!(ExitStatus::Success as u8, 0);
    }
}
