//! Constants and configuration defaults for zonefan
//!
//! Centralizes paths, hardware command codes and per-zone defaults.

use std::time::Duration;

/// System paths
pub mod paths {
    /// Default configuration file
    pub const DEFAULT_CONFIG_FILE: &str = "/etc/zonefan/zonefan.json";

    /// Base path for hwmon devices
    pub const HWMON_BASE: &str = "/sys/class/hwmon";

    /// Path to DRM (Direct Rendering Manager) devices
    pub const DRM_PATH: &str = "/sys/class/drm";

    /// Block devices in sysfs
    pub const SYS_BLOCK: &str = "/sys/block";

    /// Loaded kernel modules
    pub const PROC_MODULES: &str = "/proc/modules";

    /// Default ipmitool binary
    pub const DEFAULT_IPMITOOL: &str = "/usr/bin/ipmitool";

    /// Default smartctl binary
    pub const DEFAULT_SMARTCTL: &str = "/usr/sbin/smartctl";
}

/// Temperature conversion
pub mod temperature {
    /// hwmon temperature inputs are in millidegrees, divide by this to get Celsius
    pub const MILLIDEGREE_DIVISOR: f32 = 1000.0;
}

/// Sensor identifiers
pub mod sensors {
    /// Largest accepted GPU device id (`/sys/class/drm/cardN`)
    pub const MAX_DEVICE_ID: u32 = 100;

    /// hwmon chip names that report CPU package temperatures, in lookup order
    pub const CPU_HWMON_DRIVERS: &[&str] = &["coretemp", "k10temp"];

    /// Kernel module exposing SATA/SAS disk temperatures through hwmon
    pub const DRIVETEMP_MODULE: &str = "drivetemp";
}

/// IPMI raw command codes and limits
pub mod ipmi {
    /// CPU fan zone
    pub const CPU_ZONE: u8 = 0;

    /// Peripheral (HD) fan zone
    pub const HD_ZONE: u8 = 1;

    /// Highest accepted fan level in percent
    pub const MAX_LEVEL: u32 = 100;

    /// Level applied to every zone on shutdown
    pub const SAFE_LEVEL: u8 = 100;

    pub const DEFAULT_FAN_MODE_DELAY_SECS: f32 = 10.0;
    pub const DEFAULT_FAN_LEVEL_DELAY_SECS: f32 = 2.0;

    /// `raw 0x30 0x45 0x00` reads the fan mode
    pub const GET_FAN_MODE: &[&str] = &["raw", "0x30", "0x45", "0x00"];

    /// `raw 0x30 0x45 0x01 <mode>` sets the fan mode
    pub const SET_FAN_MODE: &[&str] = &["raw", "0x30", "0x45", "0x01"];

    /// `raw 0x30 0x70 0x66 0x01 <zone> <level>` sets a zone's fan level
    pub const SET_FAN_LEVEL: &[&str] = &["raw", "0x30", "0x70", "0x66", "0x01"];
}

/// Control loop timing
pub mod timing {
    use super::Duration;

    /// Lower bound for the main loop wait between cycles
    pub const MIN_LOOP_WAIT: Duration = Duration::from_millis(50);

    /// Log every Nth consecutive failure of a zone
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;
}

/// Log target used for configuration summaries
pub const CONFIG_LOG_TARGET: &str = "zonefan::config";

/// Per-zone configuration defaults
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneDefaults {
    pub ipmi_zone: u8,
    pub steps: u32,
    pub sensitivity: f32,
    pub polling: f32,
    pub min_temp: f32,
    pub max_temp: f32,
    pub min_level: u32,
    pub max_level: u32,
}

pub const CPU_ZONE_DEFAULTS: ZoneDefaults = ZoneDefaults {
    ipmi_zone: ipmi::CPU_ZONE,
    steps: 6,
    sensitivity: 3.0,
    polling: 2.0,
    min_temp: 30.0,
    max_temp: 60.0,
    min_level: 35,
    max_level: 100,
};

pub const HD_ZONE_DEFAULTS: ZoneDefaults = ZoneDefaults {
    ipmi_zone: ipmi::HD_ZONE,
    steps: 4,
    sensitivity: 2.0,
    polling: 10.0,
    min_temp: 32.0,
    max_temp: 46.0,
    min_level: 35,
    max_level: 100,
};

pub const GPU_ZONE_DEFAULTS: ZoneDefaults = ZoneDefaults {
    ipmi_zone: ipmi::HD_ZONE,
    steps: 5,
    sensitivity: 2.0,
    polling: 2.0,
    min_temp: 40.0,
    max_temp: 70.0,
    min_level: 35,
    max_level: 100,
};

/// Default `gpu_device_ids` value
pub const DEFAULT_GPU_DEVICE_IDS: &str = "0";

/// Default `standby_hd_limit` value
pub const DEFAULT_STANDBY_HD_LIMIT: u32 = 1;
