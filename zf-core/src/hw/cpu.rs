//! CPU zone
//!
//! One sensor per CPU package: the `temp1_input` of every `coretemp` hwmon
//! chip, or of every `k10temp` chip on AMD systems.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::debug;

use super::hwmon;
use crate::constants::{sensors, CPU_ZONE_DEFAULTS};
use crate::engine::{TemperatureSource, ZoneController};
use crate::error::{Result, ZoneFanError};
use crate::settings::{ZoneSection, CPU_ZONE_NAME};

/// A CPU package temperature input
#[derive(Debug, Clone, PartialEq)]
pub struct CpuSensor {
    /// `coretemp@hwmon2`
    pub name: String,
    pub input: PathBuf,
}

/// Temperature source of the CPU zone
#[derive(Debug, Clone)]
pub struct CpuZone {
    sensors: Vec<CpuSensor>,
}

impl CpuZone {
    /// Find the CPU package sensors under a hwmon class directory
    pub fn discover(hwmon_root: &Path) -> Result<Self> {
        let chips: Vec<(String, PathBuf)> = hwmon::hwmon_dirs(hwmon_root)
            .into_iter()
            .filter_map(|dir| {
                let name = hwmon::read_trimmed(dir.join("name")).ok()?;
                Some((name, dir))
            })
            .collect();

        for driver in sensors::CPU_HWMON_DRIVERS {
            let found: Vec<CpuSensor> = chips
                .iter()
                .filter(|(name, _)| name == driver)
                .map(|(name, dir)| CpuSensor {
                    name: format!(
                        "{}@{}",
                        name,
                        dir.file_name().map(|f| f.to_string_lossy()).unwrap_or_default()
                    ),
                    input: dir.join("temp1_input"),
                })
                .collect();
            if !found.is_empty() {
                debug!(driver = %driver, count = found.len(), "CPU sensors discovered");
                return Ok(Self { sensors: found });
            }
        }

        Err(ZoneFanError::HardwareNotFound(format!(
            "no {} hwmon device under {}",
            sensors::CPU_HWMON_DRIVERS.join("/"),
            hwmon_root.display()
        )))
    }

    pub fn sensors(&self) -> &[CpuSensor] {
        &self.sensors
    }

    /// Build the CPU zone controller from its configuration section
    pub fn from_config(section: &ZoneSection, hwmon_root: &Path) -> Result<ZoneController> {
        let settings = section.settings(CPU_ZONE_NAME, &CPU_ZONE_DEFAULTS)?;
        let zone = Self::discover(hwmon_root)?;
        ZoneController::new(settings, Box::new(zone))
    }
}

impl TemperatureSource for CpuZone {
    fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    fn read(&mut self, index: usize, _now: Instant) -> Result<f32> {
        let sensor = self.sensors.get(index).ok_or(ZoneFanError::SensorIndex {
            index,
            count: self.sensors.len(),
        })?;
        let raw = hwmon::read_trimmed(&sensor.input).map_err(|e| {
            ZoneFanError::sensor_unavailable(index, sensor.name.clone(), e.to_string())
        })?;
        hwmon::parse_millidegrees(&raw).ok_or_else(|| ZoneFanError::SensorParse {
            index,
            device: sensor.name.clone(),
            value: raw,
        })
    }

    fn describe(&self) -> Vec<String> {
        self.sensors.iter().map(|s| s.name.clone()).collect()
    }
}
