//! IPMI fan controller
//!
//! Supermicro style BMCs take fan commands as raw `ipmitool` requests:
//!
//! | request | raw bytes |
//! |---|---|
//! | get fan mode | `0x30 0x45 0x00` |
//! | set fan mode | `0x30 0x45 0x01 <mode>` |
//! | set zone level | `0x30 0x70 0x66 0x01 <zone> <level>` |
//!
//! Levels are only honoured by the BMC in FULL mode. Each command is followed
//! by a configurable delay so the BMC can settle.

use std::fmt;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::constants::{ipmi, CONFIG_LOG_TARGET};
use crate::engine::ActuatorSink;
use crate::error::{Result, ZoneFanError};
use crate::settings::IpmiSection;

/// BMC fan modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FanMode {
    Standard = 0,
    Full = 1,
    Optimal = 2,
    HeavyIo = 4,
}

impl TryFrom<u8> for FanMode {
    type Error = ZoneFanError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FanMode::Standard),
            1 => Ok(FanMode::Full),
            2 => Ok(FanMode::Optimal),
            4 => Ok(FanMode::HeavyIo),
            other => Err(ZoneFanError::InvalidFanMode(other)),
        }
    }
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FanMode::Standard => "STANDARD_MODE",
            FanMode::Full => "FULL_MODE",
            FanMode::Optimal => "OPTIMAL_MODE",
            FanMode::HeavyIo => "HEAVY_IO_MODE",
        };
        f.write_str(name)
    }
}

/// ipmitool wrapper
#[derive(Debug, Clone)]
pub struct Ipmi {
    settings: IpmiSection,
    remote: Vec<String>,
}

impl Ipmi {
    pub fn new(settings: IpmiSection) -> Self {
        let remote = settings.remote_args();
        Self { settings, remote }
    }

    pub fn settings(&self) -> &IpmiSection {
        &self.settings
    }

    /// Check that ipmitool reaches the BMC and log the configuration
    pub fn verify(&self) -> Result<()> {
        let status = Command::new(&self.settings.command)
            .args(&self.remote)
            .arg("sdr")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| {
                ZoneFanError::ipmi(format!(
                    "cannot run {}: {}",
                    self.settings.command.display(),
                    e
                ))
            })?;
        if !status.success() {
            return Err(ZoneFanError::ipmi(format!(
                "{} sdr failed ({})",
                self.settings.command.display(),
                status
            )));
        }

        info!(target: CONFIG_LOG_TARGET, "Ipmi module was initialized with:");
        info!(target: CONFIG_LOG_TARGET, "   command = {}", self.settings.command.display());
        info!(target: CONFIG_LOG_TARGET, "   fan_mode_delay = {}", self.settings.fan_mode_delay);
        info!(target: CONFIG_LOG_TARGET, "   fan_level_delay = {}", self.settings.fan_level_delay);
        info!(target: CONFIG_LOG_TARGET, "   swapped_zones = {}", self.settings.swapped_zones);
        info!(target: CONFIG_LOG_TARGET, "   remote_parameters = {}", self.settings.remote_parameters);
        Ok(())
    }

    /// Full argument list: remote parameters, then the raw request
    fn args(&self, request: &[&str], values: &[String]) -> Vec<String> {
        self.remote
            .iter()
            .cloned()
            .chain(request.iter().map(|s| s.to_string()))
            .chain(values.iter().cloned())
            .collect()
    }

    pub fn fan_mode_args(&self, mode: FanMode) -> Vec<String> {
        self.args(ipmi::SET_FAN_MODE, &[(mode as u8).to_string()])
    }

    /// Arguments of a level request, with zone swapping applied
    pub fn fan_level_args(&self, zone: u8, level: u8) -> Result<Vec<String>> {
        if zone != ipmi::CPU_ZONE && zone != ipmi::HD_ZONE {
            return Err(ZoneFanError::InvalidIpmiZone(zone));
        }
        if u32::from(level) > ipmi::MAX_LEVEL {
            return Err(ZoneFanError::InvalidFanLevel(u32::from(level)));
        }
        let zone = if self.settings.swapped_zones { 1 - zone } else { zone };
        Ok(self.args(ipmi::SET_FAN_LEVEL, &[zone.to_string(), level.to_string()]))
    }

    fn run(&self, args: &[String]) -> Result<Output> {
        debug!(command = %self.settings.command.display(), ?args, "ipmitool");
        let output = Command::new(&self.settings.command)
            .args(args)
            .output()
            .map_err(|e| {
                ZoneFanError::ipmi(format!(
                    "cannot run {}: {}",
                    self.settings.command.display(),
                    e
                ))
            })?;
        if !output.status.success() {
            return Err(ZoneFanError::ipmi(format!(
                "{} ({})",
                String::from_utf8_lossy(&output.stderr).trim(),
                output.status
            )));
        }
        Ok(output)
    }

    fn pause(seconds: f32) {
        match Duration::try_from_secs_f32(seconds) {
            Ok(delay) if !delay.is_zero() => thread::sleep(delay),
            _ => {}
        }
    }

    /// Current BMC fan mode
    pub fn get_fan_mode(&self) -> Result<FanMode> {
        let output = self.run(&self.args(ipmi::GET_FAN_MODE, &[]))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let code: u8 = stdout
            .trim()
            .parse()
            .map_err(|_| ZoneFanError::ipmi(format!("unexpected fan mode output {:?}", stdout.trim())))?;
        FanMode::try_from(code)
    }

    /// Switch the BMC fan mode and wait `fan_mode_delay`
    pub fn set_fan_mode(&mut self, mode: FanMode) -> Result<()> {
        self.run(&self.fan_mode_args(mode))?;
        Self::pause(self.settings.fan_mode_delay);
        Ok(())
    }
}

impl ActuatorSink for Ipmi {
    fn set_fan_level(&mut self, zone: u8, level: u8) -> Result<()> {
        let args = self.fan_level_args(zone, level)?;
        self.run(&args)?;
        Self::pause(self.settings.fan_level_delay);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ipmi(swapped: bool, remote: &str) -> Ipmi {
        Ipmi::new(IpmiSection {
            swapped_zones: swapped,
            remote_parameters: remote.to_string(),
            fan_mode_delay: 0.0,
            fan_level_delay: 0.0,
            ..IpmiSection::default()
        })
    }

    #[test]
    fn test_fan_mode_codes() {
        for (code, mode) in [
            (0, FanMode::Standard),
            (1, FanMode::Full),
            (2, FanMode::Optimal),
            (4, FanMode::HeavyIo),
        ] {
            assert_eq!(FanMode::try_from(code).unwrap(), mode);
        }
        assert!(matches!(FanMode::try_from(3), Err(ZoneFanError::InvalidFanMode(3))));
        assert_eq!(FanMode::Full.to_string(), "FULL_MODE");
    }

    #[test]
    fn test_fan_level_args() {
        let args = ipmi(false, "").fan_level_args(ipmi::HD_ZONE, 61).unwrap();
        assert_eq!(args, vec!["raw", "0x30", "0x70", "0x66", "0x01", "1", "61"]);
    }

    #[test]
    fn test_swapped_zones() {
        let ipmi = ipmi(true, "");
        assert_eq!(ipmi.fan_level_args(0, 50).unwrap()[5], "1");
        assert_eq!(ipmi.fan_level_args(1, 50).unwrap()[5], "0");
    }

    #[test]
    fn test_remote_parameters_come_first() {
        let args = ipmi(false, "-I lanplus -H 192.168.0.20").fan_mode_args(FanMode::Full);
        assert_eq!(
            args,
            vec!["-I", "lanplus", "-H", "192.168.0.20", "raw", "0x30", "0x45", "0x01", "1"]
        );
    }

    #[test]
    fn test_invalid_level_and_zone() {
        let ipmi = ipmi(false, "");
        assert!(matches!(ipmi.fan_level_args(2, 50), Err(ZoneFanError::InvalidIpmiZone(2))));
        assert!(matches!(ipmi.fan_level_args(0, 101), Err(ZoneFanError::InvalidFanLevel(101))));
    }

    #[test]
    fn test_missing_ipmitool() {
        let mut ipmi = Ipmi::new(IpmiSection {
            command: PathBuf::from("/nonexistent/ipmitool"),
            fan_level_delay: 0.0,
            ..IpmiSection::default()
        });
        assert!(matches!(ipmi.verify(), Err(ZoneFanError::Ipmi(_))));
        assert!(ipmi.set_fan_level(0, 100).is_err());
    }

    #[test]
    fn test_verify_checks_exit_status() {
        let failing = Ipmi::new(IpmiSection {
            command: PathBuf::from("false"),
            ..IpmiSection::default()
        });
        let err = failing.verify().unwrap_err();
        assert!(err.to_string().contains("sdr failed"), "{err}");

        let working = Ipmi::new(IpmiSection {
            command: PathBuf::from("true"),
            ..IpmiSection::default()
        });
        assert!(working.verify().is_ok());
    }
}
