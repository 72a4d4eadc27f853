//! Daemon configuration
//!
//! Stored as JSON, one object per section:
//!
//! ```json
//! {
//!   "Ipmi": { "command": "/usr/bin/ipmitool", "fan_mode_delay": 10 },
//!   "CPU zone": { "enabled": true, "temp_calc": "avg" },
//!   "HD zone": { "enabled": true, "hd_names": "/dev/sda /dev/sdb" },
//!   "GPU zone": { "enabled": false, "gpu_device_ids": "0, 1" }
//! }
//! ```
//!
//! Every zone key is optional and falls back to the zone's defaults from
//! [`crate::constants`]. The whole document is checked by
//! [`DaemonConfig::validate`] when loaded.

use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{
    self, ipmi, paths, ZoneDefaults, CPU_ZONE_DEFAULTS, GPU_ZONE_DEFAULTS, HD_ZONE_DEFAULTS,
};
use crate::engine::{CalcMode, ZoneController, ZoneSettings};
use crate::error::{Result, ZoneFanError};
use crate::hw::cpu::CpuZone;
use crate::hw::disk::HdZone;
use crate::hw::gpu::{DrmHwmonSource, GpuZone};
use crate::validation;

pub const CPU_ZONE_NAME: &str = "CPU zone";
pub const HD_ZONE_NAME: &str = "HD zone";
pub const GPU_ZONE_NAME: &str = "GPU zone";

/// Complete daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(rename = "Ipmi", default)]
    pub ipmi: IpmiSection,

    #[serde(rename = "CPU zone", default)]
    pub cpu_zone: ZoneSection,

    #[serde(rename = "HD zone", default)]
    pub hd_zone: HdZoneSection,

    #[serde(rename = "GPU zone", default)]
    pub gpu_zone: GpuZoneSection,
}

/// `[Ipmi]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpmiSection {
    /// Path of the ipmitool binary
    #[serde(default = "default_ipmitool")]
    pub command: PathBuf,

    /// Seconds to wait after a fan mode change
    #[serde(default = "default_fan_mode_delay")]
    pub fan_mode_delay: f32,

    /// Seconds to wait after a fan level change
    #[serde(default = "default_fan_level_delay")]
    pub fan_level_delay: f32,

    /// Boards wired with the CPU and HD zones the other way around
    #[serde(default)]
    pub swapped_zones: bool,

    /// Extra ipmitool arguments for a remote BMC (`-I lanplus -H ...`)
    #[serde(default)]
    pub remote_parameters: String,
}

/// Keys shared by every zone section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZoneSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, deserialize_with = "deserialize_ipmi_zone")]
    pub ipmi_zone: Option<u8>,

    #[serde(default)]
    pub temp_calc: Option<CalcMode>,

    #[serde(default)]
    pub steps: Option<u32>,

    #[serde(default)]
    pub sensitivity: Option<f32>,

    #[serde(default)]
    pub polling: Option<f32>,

    #[serde(default)]
    pub min_temp: Option<f32>,

    #[serde(default)]
    pub max_temp: Option<f32>,

    #[serde(default)]
    pub min_level: Option<u32>,

    #[serde(default)]
    pub max_level: Option<u32>,
}

/// `[HD zone]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HdZoneSection {
    #[serde(flatten)]
    pub zone: ZoneSection,

    /// Disk device paths, whitespace separated
    #[serde(default)]
    pub hd_names: Option<String>,

    #[serde(default = "default_smartctl")]
    pub smartctl_path: PathBuf,

    #[serde(default)]
    pub standby_guard_enabled: bool,

    /// Disks in standby that send the whole array to standby
    #[serde(default = "default_standby_hd_limit")]
    pub standby_hd_limit: u32,
}

/// `[GPU zone]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuZoneSection {
    #[serde(flatten)]
    pub zone: ZoneSection,

    #[serde(default = "default_gpu_device_ids")]
    pub gpu_device_ids: String,
}

fn default_ipmitool() -> PathBuf { PathBuf::from(paths::DEFAULT_IPMITOOL) }
fn default_smartctl() -> PathBuf { PathBuf::from(paths::DEFAULT_SMARTCTL) }
fn default_fan_mode_delay() -> f32 { ipmi::DEFAULT_FAN_MODE_DELAY_SECS }
fn default_fan_level_delay() -> f32 { ipmi::DEFAULT_FAN_LEVEL_DELAY_SECS }
fn default_standby_hd_limit() -> u32 { constants::DEFAULT_STANDBY_HD_LIMIT }
fn default_gpu_device_ids() -> String { constants::DEFAULT_GPU_DEVICE_IDS.to_string() }

/// `ipmi_zone` may be written as `1` or `"1"`
fn deserialize_ipmi_zone<'de, D>(deserializer: D) -> std::result::Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u8),
        Text(String),
    }

    match Option::<Repr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Repr::Number(zone)) => Ok(Some(zone)),
        Some(Repr::Text(text)) => text
            .trim()
            .parse::<u8>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid ipmi_zone {text:?}"))),
    }
}

impl Default for IpmiSection {
    fn default() -> Self {
        Self {
            command: default_ipmitool(),
            fan_mode_delay: default_fan_mode_delay(),
            fan_level_delay: default_fan_level_delay(),
            swapped_zones: false,
            remote_parameters: String::new(),
        }
    }
}

impl Default for HdZoneSection {
    fn default() -> Self {
        Self {
            zone: ZoneSection::default(),
            hd_names: None,
            smartctl_path: default_smartctl(),
            standby_guard_enabled: false,
            standby_hd_limit: default_standby_hd_limit(),
        }
    }
}

impl Default for GpuZoneSection {
    fn default() -> Self {
        Self {
            zone: ZoneSection::default(),
            gpu_device_ids: default_gpu_device_ids(),
        }
    }
}

impl IpmiSection {
    pub fn validate(&self) -> Result<()> {
        validation::validate_delay("[Ipmi] fan_mode_delay", self.fan_mode_delay)?;
        validation::validate_delay("[Ipmi] fan_level_delay", self.fan_level_delay)?;
        Ok(())
    }

    /// `remote_parameters` split into ipmitool arguments
    pub fn remote_args(&self) -> Vec<String> {
        self.remote_parameters
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}

impl ZoneSection {
    /// Resolve the section against a zone's defaults and validate it
    pub fn settings(&self, name: &str, defaults: &ZoneDefaults) -> Result<ZoneSettings> {
        let settings = ZoneSettings {
            name: name.to_string(),
            ipmi_zone: self.ipmi_zone.unwrap_or(defaults.ipmi_zone),
            calc: self.temp_calc.unwrap_or_default(),
            steps: self.steps.unwrap_or(defaults.steps),
            sensitivity: self.sensitivity.unwrap_or(defaults.sensitivity),
            polling: self.polling.unwrap_or(defaults.polling),
            min_temp: self.min_temp.unwrap_or(defaults.min_temp),
            max_temp: self.max_temp.unwrap_or(defaults.max_temp),
            min_level: self.min_level.unwrap_or(defaults.min_level),
            max_level: self.max_level.unwrap_or(defaults.max_level),
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl HdZoneSection {
    /// Configured disk paths
    pub fn disks(&self) -> Result<Vec<String>> {
        let names = self
            .hd_names
            .as_deref()
            .ok_or_else(|| ZoneFanError::MissingConfig(format!("[{HD_ZONE_NAME}] hd_names")))?;
        validation::parse_hd_names(names)
    }

    /// Check `standby_hd_limit` against the number of disks
    ///
    /// A single disk never runs the guard, so its limit is not checked.
    pub fn validate_standby_limit(&self, count: usize) -> Result<()> {
        if self.standby_guard_enabled && count > 1 && self.standby_hd_limit as usize > count {
            return Err(ZoneFanError::invalid_config(
                format!("[{HD_ZONE_NAME}] standby_hd_limit"),
                format!("{} > number of disks ({count})", self.standby_hd_limit),
            ));
        }
        Ok(())
    }
}

impl DaemonConfig {
    /// Validate every section that will be used
    pub fn validate(&self) -> Result<()> {
        self.ipmi.validate()?;

        if self.cpu_zone.enabled {
            self.cpu_zone.settings(CPU_ZONE_NAME, &CPU_ZONE_DEFAULTS)?;
        }
        if self.hd_zone.zone.enabled {
            self.hd_zone.zone.settings(HD_ZONE_NAME, &HD_ZONE_DEFAULTS)?;
            let disks = self.hd_zone.disks()?;
            self.hd_zone.validate_standby_limit(disks.len())?;
        }
        if self.gpu_zone.zone.enabled {
            self.gpu_zone.zone.settings(GPU_ZONE_NAME, &GPU_ZONE_DEFAULTS)?;
            validation::parse_device_ids(&self.gpu_zone.gpu_device_ids)?;
        }
        Ok(())
    }

    /// Whether at least one zone is enabled
    pub fn any_zone_enabled(&self) -> bool {
        self.cpu_zone.enabled || self.hd_zone.zone.enabled || self.gpu_zone.zone.enabled
    }
}

/// Parse and validate a configuration document
pub fn parse_config(content: &str) -> Result<DaemonConfig> {
    let config: DaemonConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the configuration file at `path`
pub fn load_config(path: impl AsRef<Path>) -> Result<DaemonConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ZoneFanError::FileNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| ZoneFanError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Construct a controller for every enabled zone on the local machine
pub fn build_zones(config: &DaemonConfig) -> Result<Vec<ZoneController>> {
    let mut zones = Vec::new();
    if config.cpu_zone.enabled {
        zones.push(CpuZone::from_config(&config.cpu_zone, Path::new(paths::HWMON_BASE))?);
    }
    if config.hd_zone.zone.enabled {
        zones.push(HdZone::from_config(&config.hd_zone, Path::new(paths::SYS_BLOCK))?);
    }
    if config.gpu_zone.zone.enabled {
        zones.push(GpuZone::from_config(
            &config.gpu_zone,
            DrmHwmonSource::new(paths::DRM_PATH),
        )?);
    }
    Ok(zones)
}
