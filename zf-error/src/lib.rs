//! Unified error handling for zonefan
//!
//! A single error type shared by the core library and the daemon. Variants
//! fall into three families the control loop treats differently:
//!
//! - configuration errors abort startup,
//! - sensor errors are recoverable per cycle (the zone keeps its last level),
//! - hardware command errors (IPMI) are reported and retried on the next
//!   cycle.

use std::io;
use std::path::PathBuf;

/// Result type alias using ZoneFanError
pub type Result<T> = std::result::Result<T, ZoneFanError>;

/// Unified error type for all zonefan operations
#[derive(thiserror::Error, Debug)]
pub enum ZoneFanError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ============================================================================
    // Sensor Errors
    // ============================================================================
    #[error("Sensor {device} (index {index}) unavailable: {reason}")]
    SensorUnavailable {
        index: usize,
        device: String,
        reason: String,
    },

    #[error("Sensor {device} (index {index}) returned an invalid value: {value:?}")]
    SensorParse {
        index: usize,
        device: String,
        value: String,
    },

    #[error("Sensor index {index} out of range (zone has {count} sensors)")]
    SensorIndex {
        index: usize,
        count: usize,
    },

    // ============================================================================
    // Hardware Command Errors
    // ============================================================================
    #[error("IPMI error: {0}")]
    Ipmi(String),

    #[error("Invalid IPMI fan mode: {0}")]
    InvalidFanMode(u8),

    #[error("Invalid fan level: {0} (must be 0-100)")]
    InvalidFanLevel(u32),

    #[error("Invalid IPMI zone: {0}")]
    InvalidIpmiZone(u8),

    #[error("smartctl failed for {device}: {reason}")]
    Smartctl {
        device: String,
        reason: String,
    },

    #[error("Hardware not found: {0}")]
    HardwareNotFound(String),

    #[error("Missing runtime dependency: {0}")]
    Dependency(String),
}

impl ZoneFanError {
    /// Create an invalid configuration value error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a sensor unavailable error for a position in a zone's sensor list
    pub fn sensor_unavailable(
        index: usize,
        device: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SensorUnavailable {
            index,
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Create an IPMI error from a string
    pub fn ipmi(msg: impl Into<String>) -> Self {
        Self::Ipmi(msg.into())
    }

    /// True for errors that must stop the daemon from starting
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::JsonParse(_) | Self::InvalidConfig { .. } | Self::MissingConfig(_)
        )
    }

    /// True for per-cycle sensor failures a zone can recover from
    pub fn is_sensor_error(&self) -> bool {
        matches!(
            self,
            Self::SensorUnavailable { .. } | Self::SensorParse { .. } | Self::Smartctl { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_unavailable_display() {
        let err = ZoneFanError::sensor_unavailable(1, "card3", "no hwmon temperature inputs");
        assert_eq!(
            err.to_string(),
            "Sensor card3 (index 1) unavailable: no hwmon temperature inputs"
        );
        assert!(err.is_sensor_error());
        assert!(!err.is_config_error());
    }

    #[test]
    fn test_config_classification() {
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(ZoneFanError::from(json).is_config_error());
        assert!(ZoneFanError::invalid_config("steps", "steps <= 0").is_config_error());
        assert!(ZoneFanError::MissingConfig("hd_names".into()).is_config_error());
        assert!(!ZoneFanError::ipmi("exit status 1").is_config_error());
    }

    #[test]
    fn test_file_errors_are_not_config_errors() {
        let err = ZoneFanError::FileRead {
            path: PathBuf::from("/proc/modules"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!err.is_config_error());
        assert!(!err.is_sensor_error());
    }
}
