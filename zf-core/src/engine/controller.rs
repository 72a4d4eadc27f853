//! Zone controller
//!
//! A zone owns N temperature sensors and drives one IPMI fan zone. Every cycle
//! it reads the sensors through its [`TemperatureSource`], folds them into one
//! zone temperature according to its [`CalcMode`], maps that temperature onto
//! the zone's [`StepCurve`] and hands changed levels to an [`ActuatorSink`].
//!
//! # Cycle
//!
//! 1. **Polling**: a zone polled less than `polling` seconds ago does nothing.
//! 2. **Sensitivity**: once a level has been applied, temperature changes
//!    smaller than `sensitivity` are ignored.
//! 3. **Level**: the stepped curve gives the new level; it is only sent to
//!    the actuator when it differs from the last applied one.
//!
//! A failed cycle keeps the previous level and temperature in force. The poll
//! timestamp is already taken, so the retry comes after the next polling
//! interval.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::curve::StepCurve;
use crate::constants::{ipmi, CONFIG_LOG_TARGET};
use crate::error::{Result, ZoneFanError};

/// How the readings of a zone's sensors are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "CalcModeRepr", into = "String")]
pub enum CalcMode {
    Minimum,
    #[default]
    Average,
    Maximum,
}

/// Accepted spellings of `temp_calc`: a name or a legacy numeric code
#[derive(Deserialize)]
#[serde(untagged)]
enum CalcModeRepr {
    Code(i64),
    Name(String),
}

impl TryFrom<CalcModeRepr> for CalcMode {
    type Error = String;

    fn try_from(repr: CalcModeRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            CalcModeRepr::Code(0) => Ok(CalcMode::Minimum),
            CalcModeRepr::Code(1) => Ok(CalcMode::Average),
            CalcModeRepr::Code(2) => Ok(CalcMode::Maximum),
            CalcModeRepr::Code(code) => Err(format!("invalid temp_calc code {code} (0-2)")),
            CalcModeRepr::Name(name) => name.parse(),
        }
    }
}

impl std::str::FromStr for CalcMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "min" | "minimum" | "0" => Ok(CalcMode::Minimum),
            "avg" | "average" | "1" => Ok(CalcMode::Average),
            "max" | "maximum" | "2" => Ok(CalcMode::Maximum),
            other => Err(format!("invalid temp_calc {other:?} (min, avg or max)")),
        }
    }
}

impl fmt::Display for CalcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalcMode::Minimum => write!(f, "min"),
            CalcMode::Average => write!(f, "avg"),
            CalcMode::Maximum => write!(f, "max"),
        }
    }
}

impl From<CalcMode> for String {
    fn from(mode: CalcMode) -> Self {
        mode.to_string()
    }
}

/// Temperature access for one kind of zone (CPU, disk, GPU)
#[cfg_attr(test, mockall::automock)]
pub trait TemperatureSource {
    /// Number of sensors in the zone
    fn sensor_count(&self) -> usize;

    /// Temperature in Celsius of the sensor at `index` in the zone's list
    fn read(&mut self, index: usize, now: Instant) -> Result<f32>;

    /// Hook run once per cycle before the sensors are read
    fn before_cycle(&mut self, _now: Instant) -> Result<()> {
        Ok(())
    }

    /// Human readable sensor list for the configuration summary
    fn describe(&self) -> Vec<String>;
}

/// Receiver of fan levels (the IPMI fan controller)
#[cfg_attr(test, mockall::automock)]
pub trait ActuatorSink {
    /// Set the fan level (percent) of an IPMI zone
    fn set_fan_level(&mut self, zone: u8, level: u8) -> Result<()>;
}

/// Numeric options shared by every zone
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSettings {
    pub name: String,
    pub ipmi_zone: u8,
    pub calc: CalcMode,
    pub steps: u32,
    /// Hysteresis band in Celsius
    pub sensitivity: f32,
    /// Minimum seconds between two sensor polls
    pub polling: f32,
    pub min_temp: f32,
    pub max_temp: f32,
    pub min_level: u32,
    pub max_level: u32,
}

impl ZoneSettings {
    /// Check the bound invariants of a zone
    pub fn validate(&self) -> Result<()> {
        if self.ipmi_zone != ipmi::CPU_ZONE && self.ipmi_zone != ipmi::HD_ZONE {
            return Err(self.invalid("ipmi_zone", format!("{} is not a valid IPMI zone", self.ipmi_zone)));
        }
        if self.steps == 0 {
            return Err(self.invalid("steps", "steps <= 0"));
        }
        if !self.sensitivity.is_finite() || self.sensitivity <= 0.0 {
            return Err(self.invalid("sensitivity", "sensitivity <= 0"));
        }
        if !self.polling.is_finite() || self.polling < 0.0 {
            return Err(self.invalid("polling", "polling < 0"));
        }
        if Duration::try_from_secs_f32(self.polling).is_err() {
            return Err(self.invalid("polling", format!("{} seconds is out of range", self.polling)));
        }
        if !self.min_temp.is_finite() || !self.max_temp.is_finite() {
            return Err(self.invalid("min_temp", "temperature bounds must be finite"));
        }
        if self.max_temp <= self.min_temp {
            return Err(self.invalid("max_temp", "max_temp <= min_temp"));
        }
        if self.max_level > ipmi::MAX_LEVEL {
            return Err(self.invalid("max_level", "max_level > 100"));
        }
        if self.max_level < self.min_level {
            return Err(self.invalid("max_level", "max_level < min_level"));
        }
        Ok(())
    }

    /// Polling interval as a duration, zero when `polling` is out of range
    pub fn polling_interval(&self) -> Duration {
        Duration::try_from_secs_f32(self.polling).unwrap_or_default()
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> ZoneFanError {
        ZoneFanError::invalid_config(format!("[{}] {}", self.name, key), reason)
    }
}

/// What one call to [`ZoneController::run`] did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// The polling interval has not elapsed yet
    Waiting,
    /// The temperature moved less than the sensitivity band
    WithinSensitivity { temperature: f32 },
    /// The computed level equals the applied one
    Unchanged { temperature: f32, level: u8 },
    /// A new level was sent to the actuator
    Changed { temperature: f32, level: u8 },
}

/// Fan controller for one zone
pub struct ZoneController {
    settings: ZoneSettings,
    curve: StepCurve,
    source: Box<dyn TemperatureSource>,
    last_poll: Option<Instant>,
    last_temp: f32,
    last_level: Option<u8>,
}

impl fmt::Debug for ZoneController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoneController")
            .field("settings", &self.settings)
            .field("last_temp", &self.last_temp)
            .field("last_level", &self.last_level)
            .finish_non_exhaustive()
    }
}

impl ZoneController {
    /// Validate the settings and attach a temperature source
    pub fn new(settings: ZoneSettings, source: Box<dyn TemperatureSource>) -> Result<Self> {
        settings.validate()?;
        if source.sensor_count() == 0 {
            return Err(ZoneFanError::invalid_config(
                format!("[{}] sensors", settings.name),
                "zone has no sensors",
            ));
        }

        // validate() bounds both levels to 0..=100
        let curve = StepCurve::new(
            settings.min_temp,
            settings.max_temp,
            settings.min_level as u8,
            settings.max_level as u8,
            settings.steps,
        );

        let controller = Self {
            settings,
            curve,
            source,
            last_poll: None,
            last_temp: 0.0,
            last_level: None,
        };
        controller.log_configuration();
        Ok(controller)
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &ZoneSettings {
        &self.settings
    }

    pub fn curve(&self) -> &StepCurve {
        &self.curve
    }

    pub fn sensor_count(&self) -> usize {
        self.source.sensor_count()
    }

    /// Last level sent to the actuator
    pub fn last_level(&self) -> Option<u8> {
        self.last_level
    }

    /// Temperature behind the last applied level
    pub fn last_temperature(&self) -> f32 {
        self.last_temp
    }

    /// Read every sensor and combine the values per calc mode
    pub fn zone_temperature(&mut self, now: Instant) -> Result<f32> {
        let count = self.source.sensor_count();
        if count == 1 {
            return self.source.read(0, now);
        }

        match self.settings.calc {
            CalcMode::Minimum => {
                let mut minimum = f32::INFINITY;
                for index in 0..count {
                    minimum = minimum.min(self.source.read(index, now)?);
                }
                Ok(minimum)
            }
            CalcMode::Average => {
                let mut sum = 0.0;
                for index in 0..count {
                    sum += self.source.read(index, now)?;
                }
                Ok(sum / count as f32)
            }
            CalcMode::Maximum => {
                let mut maximum = f32::NEG_INFINITY;
                for index in 0..count {
                    maximum = maximum.max(self.source.read(index, now)?);
                }
                Ok(maximum)
            }
        }
    }

    /// Run one control cycle at `now`
    pub fn run(&mut self, now: Instant, sink: &mut dyn ActuatorSink) -> Result<CycleOutcome> {
        if let Some(last) = self.last_poll {
            if now.saturating_duration_since(last) < self.settings.polling_interval() {
                return Ok(CycleOutcome::Waiting);
            }
        }
        self.last_poll = Some(now);

        self.source.before_cycle(now)?;
        let temperature = self.zone_temperature(now)?;
        debug!(zone = %self.settings.name, "new temperature > {:.1}C", temperature);

        if self.last_level.is_some()
            && (temperature - self.last_temp).abs() < self.settings.sensitivity
        {
            return Ok(CycleOutcome::WithinSensitivity { temperature });
        }

        let level = self.curve.level_for(temperature);
        if self.last_level == Some(level) {
            self.last_temp = temperature;
            return Ok(CycleOutcome::Unchanged { temperature, level });
        }

        sink.set_fan_level(self.settings.ipmi_zone, level)?;
        self.last_temp = temperature;
        self.last_level = Some(level);
        info!(
            zone = %self.settings.name,
            "new fan level > {}%/{:.1}C", level, temperature
        );
        Ok(CycleOutcome::Changed { temperature, level })
    }

    fn log_configuration(&self) {
        let s = &self.settings;
        info!(target: CONFIG_LOG_TARGET, "{} fan controller was initialized with:", s.name);
        info!(target: CONFIG_LOG_TARGET, "   ipmi zone = {}", s.ipmi_zone);
        info!(target: CONFIG_LOG_TARGET, "   count = {}", self.source.sensor_count());
        info!(target: CONFIG_LOG_TARGET, "   temp_calc = {}", s.calc);
        info!(target: CONFIG_LOG_TARGET, "   steps = {}", s.steps);
        info!(target: CONFIG_LOG_TARGET, "   sensitivity = {}", s.sensitivity);
        info!(target: CONFIG_LOG_TARGET, "   polling = {}", s.polling);
        info!(target: CONFIG_LOG_TARGET, "   min_temp = {}", s.min_temp);
        info!(target: CONFIG_LOG_TARGET, "   max_temp = {}", s.max_temp);
        info!(target: CONFIG_LOG_TARGET, "   min_level = {}", s.min_level);
        info!(target: CONFIG_LOG_TARGET, "   max_level = {}", s.max_level);
        info!(target: CONFIG_LOG_TARGET, "   sensors = {:?}", self.source.describe());
        info!(target: CONFIG_LOG_TARGET, "   Temperature to level mapping:");
        for (i, (temp, level)) in self.curve.mapping().into_iter().enumerate() {
            info!(target: CONFIG_LOG_TARGET, "   {}. [T:{:.1}C - L:{}%]", i, temp, level);
        }
    }
}
