//! Configuration value parsing and validation
//!
//! Values that arrive as free-form strings in the configuration file are
//! turned into typed lists here, once, at load time.

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::constants::sensors;
use crate::error::{Result, ZoneFanError};

static SPACE_RUNS: OnceLock<Regex> = OnceLock::new();

fn space_runs() -> &'static Regex {
    SPACE_RUNS.get_or_init(|| Regex::new(r" +").expect("static regex"))
}

/// Parse a GPU device id list such as `"0, 1"` or `"0 1"`
///
/// Runs of spaces collapse to one. A list containing a comma is split on
/// commas, otherwise on spaces. Every token must be an integer in `0..=100`
/// and appear only once.
pub fn parse_device_ids(value: &str) -> Result<Vec<u8>> {
    let normalized = space_runs().replace_all(value.trim(), " ");
    if normalized.is_empty() {
        return Err(ZoneFanError::invalid_config("gpu_device_ids", "empty device id list"));
    }

    let delimiter = if normalized.contains(',') { ',' } else { ' ' };
    let mut seen = HashSet::new();
    let mut ids = Vec::new();

    for token in normalized.split(delimiter).map(str::trim) {
        let id: u32 = token.parse().map_err(|_| {
            ZoneFanError::invalid_config(
                "gpu_device_ids",
                format!("invalid device id {token:?} in {value:?}"),
            )
        })?;
        if id > sensors::MAX_DEVICE_ID {
            return Err(ZoneFanError::invalid_config(
                "gpu_device_ids",
                format!("device id {id} out of range (0-{})", sensors::MAX_DEVICE_ID),
            ));
        }
        if !seen.insert(id) {
            return Err(ZoneFanError::invalid_config(
                "gpu_device_ids",
                format!("duplicate device id {id}"),
            ));
        }
        ids.push(id as u8);
    }

    Ok(ids)
}

/// Split `hd_names` on any whitespace, newlines included
pub fn parse_hd_names(value: &str) -> Result<Vec<String>> {
    let names: Vec<String> = value.split_whitespace().map(str::to_string).collect();
    if names.is_empty() {
        return Err(ZoneFanError::MissingConfig("[HD zone] hd_names".to_string()));
    }
    Ok(names)
}

/// Validate a delay in seconds (finite, not negative, fits a `Duration`)
pub fn validate_delay(field: &str, seconds: f32) -> Result<f32> {
    if Duration::try_from_secs_f32(seconds).is_err() {
        return Err(ZoneFanError::invalid_config(
            field,
            format!("{seconds} (must be >= 0 and fit a duration)"),
        ));
    }
    Ok(seconds)
}
