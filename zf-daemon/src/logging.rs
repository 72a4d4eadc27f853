//! Logging setup
//!
//! Levels follow the daemon's `-l` option. CONFIG prints errors plus the
//! configuration summaries that zones and the IPMI module emit on the
//! `zonefan::config` target at startup.

use anyhow::{bail, Context};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use zf_core::constants::CONFIG_LOG_TARGET;

/// Environment variable overriding the `-l` filter
pub const LOG_ENV: &str = "ZONEFAN_LOG";

const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

/// Filter directive for a `-l` value
pub fn level_directive(level: u8) -> anyhow::Result<String> {
    Ok(match level {
        0 => "off".to_string(),
        1 => "error".to_string(),
        2 => format!("error,{CONFIG_LOG_TARGET}=info"),
        3 => "info".to_string(),
        4 => "debug".to_string(),
        other => bail!("invalid log level {other} (0-4)"),
    })
}

/// Where log records go, from the `-o` option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    Journald,
}

impl TryFrom<u8> for LogOutput {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> anyhow::Result<Self> {
        match value {
            0 => Ok(LogOutput::Stdout),
            1 => Ok(LogOutput::Stderr),
            2 => Ok(LogOutput::Journald),
            other => bail!("invalid log output {other} (0-2)"),
        }
    }
}

/// Install the global subscriber, returning the output actually used
///
/// Journald falls back to stdout when the journal socket is missing.
pub fn init(level: u8, output: LogOutput) -> anyhow::Result<LogOutput> {
    let directive = match std::env::var(LOG_ENV) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => level_directive(level)?,
    };
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("invalid log filter {directive:?}"))?;

    let mut output = output;
    if output == LogOutput::Journald {
        if std::path::Path::new(JOURNALD_SOCKET).exists() {
            match tracing_journald::layer() {
                Ok(journald_layer) => {
                    tracing_subscriber::registry()
                        .with(journald_layer)
                        .with(filter)
                        .try_init()
                        .context("cannot install journald subscriber")?;
                    return Ok(LogOutput::Journald);
                }
                Err(e) => {
                    eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
                }
            }
        }
        output = LogOutput::Stdout;
    }

    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter);
    let installed = match output {
        LogOutput::Stderr => builder.with_writer(std::io::stderr).try_init(),
        _ => builder.try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("cannot install log subscriber: {e}"))?;

    Ok(output)
}
