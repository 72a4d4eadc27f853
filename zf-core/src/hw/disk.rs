//! HD zone
//!
//! Disk temperatures come from the `drivetemp` hwmon node of the block device
//! when the kernel exposes one (SATA, NVMe) and from `smartctl -A` otherwise
//! (SAS/SCSI).
//!
//! The optional standby guard keeps a RAID array from spinning half asleep:
//! once `standby_hd_limit` members went to standby on their own, the rest is
//! sent to standby too.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::hwmon;
use crate::constants::{CONFIG_LOG_TARGET, HD_ZONE_DEFAULTS};
use crate::engine::{TemperatureSource, ZoneController};
use crate::error::{Result, ZoneFanError};
use crate::settings::{HdZoneSection, HD_ZONE_NAME};

/// Power state control of a disk
#[cfg_attr(test, mockall::automock)]
pub trait DiskPower {
    /// Whether the disk is spun down
    fn in_standby(&self, disk: &str) -> Result<bool>;

    /// Spin the disk down now
    fn enter_standby(&self, disk: &str) -> Result<()>;
}

/// Thin wrapper around the smartctl binary
#[derive(Debug, Clone)]
pub struct Smartctl {
    path: PathBuf,
}

impl Smartctl {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run(&self, args: &[&str], disk: &str) -> Result<Output> {
        Command::new(&self.path)
            .args(args)
            .arg(disk)
            .output()
            .map_err(|e| ZoneFanError::Smartctl {
                device: disk.to_string(),
                reason: format!("cannot run {}: {}", self.path.display(), e),
            })
    }

    /// Temperature reported by `smartctl -A`
    pub fn temperature(&self, disk: &str) -> Result<f32> {
        let output = self.run(&["-A"], disk)?;
        // bits 0 and 1 of the exit status mean the command itself failed
        match output.status.code() {
            Some(code) if code & 0b11 == 0 => {}
            code => {
                return Err(ZoneFanError::Smartctl {
                    device: disk.to_string(),
                    reason: format!("unknown smartctl return value {code:?}"),
                })
            }
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_smartctl_temperature(&stdout).ok_or_else(|| ZoneFanError::Smartctl {
            device: disk.to_string(),
            reason: "no temperature in smartctl output".to_string(),
        })
    }
}

impl DiskPower for Smartctl {
    fn in_standby(&self, disk: &str) -> Result<bool> {
        let output = self.run(&["-i", "-n", "standby"], disk)?;
        match output.status.code() {
            Some(0) | Some(2) => {}
            code => {
                return Err(ZoneFanError::Smartctl {
                    device: disk.to_string(),
                    reason: format!("unknown smartctl return value {code:?}"),
                })
            }
        }
        Ok(String::from_utf8_lossy(&output.stdout).contains("STANDBY"))
    }

    fn enter_standby(&self, disk: &str) -> Result<()> {
        let output = self.run(&["-s", "standby,now"], disk)?;
        if !output.status.success() {
            return Err(ZoneFanError::Smartctl {
                device: disk.to_string(),
                reason: format!("unknown smartctl return value {:?}", output.status.code()),
            });
        }
        Ok(())
    }
}

/// Extract the current temperature from `smartctl -A` output
///
/// Understands the SCSI `Current Drive Temperature`, NVMe `Temperature` and
/// ATA attribute 194 / 190 formats.
pub fn parse_smartctl_temperature(output: &str) -> Option<f32> {
    let mut ata_194 = None;
    let mut ata_190 = None;

    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Current Drive Temperature:") {
            if let Some(value) = first_number(rest) {
                return Some(value);
            }
        } else if let Some(rest) = line.strip_prefix("Temperature:") {
            if let Some(value) = first_number(rest) {
                return Some(value);
            }
        } else {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() >= 10 {
                let raw = fields[9].parse::<f32>().ok();
                match fields[0] {
                    "194" => ata_194 = ata_194.or(raw),
                    "190" => ata_190 = ata_190.or(raw),
                    _ => {}
                }
            }
        }
    }

    ata_194.or(ata_190)
}

fn first_number(text: &str) -> Option<f32> {
    text.split_whitespace().next()?.parse().ok()
}

/// What a standby guard check did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyTransition {
    None,
    ToStandby,
    ToActive,
}

/// Keeps the disks of an array in the same power state
pub struct StandbyGuard<P> {
    disks: Vec<String>,
    limit: usize,
    power: P,
    states: Vec<bool>,
    array_standby: Option<bool>,
    changed_at: Option<Instant>,
}

impl<P: DiskPower> StandbyGuard<P> {
    pub fn new(disks: Vec<String>, limit: usize, power: P) -> Result<Self> {
        if limit > disks.len() {
            return Err(ZoneFanError::invalid_config(
                format!("[{HD_ZONE_NAME}] standby_hd_limit"),
                format!("{limit} > number of disks ({})", disks.len()),
            ));
        }
        let states = vec![false; disks.len()];
        Ok(Self {
            disks,
            limit,
            power,
            states,
            array_standby: None,
            changed_at: None,
        })
    }

    /// One character per disk, `A` active and `S` standby
    pub fn state_string(&self) -> String {
        self.states
            .iter()
            .map(|standby| if *standby { 'S' } else { 'A' })
            .collect()
    }

    /// Whether the array as a whole is in standby
    pub fn array_in_standby(&self) -> bool {
        self.array_standby.unwrap_or(false)
    }

    /// Query every disk and move the array between states when needed
    pub fn check(&mut self, now: Instant) -> Result<StandbyTransition> {
        for (state, disk) in self.states.iter_mut().zip(&self.disks) {
            *state = self.power.in_standby(disk)?;
        }
        let in_standby = self.states.iter().filter(|s| **s).count();

        let array_standby = *self
            .array_standby
            .get_or_insert(in_standby == self.disks.len());
        let changed_at = *self.changed_at.get_or_insert(now);
        let hours = now.saturating_duration_since(changed_at).as_secs_f32() / 3600.0;

        if !array_standby && in_standby >= self.limit {
            info!(
                "Standby guard: change ACTIVE to STANDBY after {:.1} hour(s) [{}]",
                hours,
                self.state_string()
            );
            for (state, disk) in self.states.iter_mut().zip(&self.disks) {
                if !*state {
                    self.power.enter_standby(disk)?;
                    *state = true;
                }
            }
            self.array_standby = Some(true);
            self.changed_at = Some(now);
            Ok(StandbyTransition::ToStandby)
        } else if array_standby && in_standby < self.disks.len() {
            info!(
                "Standby guard: change STANDBY to ACTIVE after {:.1} hour(s) [{}]",
                hours,
                self.state_string()
            );
            self.array_standby = Some(false);
            self.changed_at = Some(now);
            Ok(StandbyTransition::ToActive)
        } else {
            Ok(StandbyTransition::None)
        }
    }
}

/// Where a disk's temperature is read from
#[derive(Debug, Clone, PartialEq)]
pub enum DiskTemperature {
    /// drivetemp / nvme hwmon `temp1_input`
    Hwmon(PathBuf),
    Smartctl,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Disk {
    pub name: String,
    pub temperature: DiskTemperature,
}

/// Locate the hwmon temperature input of a block device
///
/// `device` may be a symlink such as `/dev/disk/by-id/...`; its target names
/// the block device under `sys_block`.
pub fn resolve_disk_hwmon(sys_block: &Path, device: &Path) -> Option<PathBuf> {
    let resolved = fs::canonicalize(device).unwrap_or_else(|_| device.to_path_buf());
    let block = resolved.file_name()?;
    let device_dir = sys_block.join(block).join("device");

    hwmon::hwmon_dirs(&device_dir.join("hwmon"))
        .into_iter()
        .chain(hwmon::hwmon_dirs(&device_dir))
        .map(|dir| dir.join("temp1_input"))
        .find(|input| input.is_file())
}

/// Temperature source of the HD zone
pub struct HdZone {
    disks: Vec<Disk>,
    smartctl: Smartctl,
    guard: Option<StandbyGuard<Smartctl>>,
}

impl HdZone {
    /// Resolve every configured disk
    pub fn new(section: &HdZoneSection, sys_block: &Path) -> Result<Self> {
        let names = section.disks()?;
        let mut disks = Vec::with_capacity(names.len());
        for name in names {
            let path = Path::new(&name);
            if !path.exists() {
                return Err(ZoneFanError::invalid_config(
                    format!("[{HD_ZONE_NAME}] hd_names"),
                    format!("{name} cannot be accessed"),
                ));
            }
            let temperature = match resolve_disk_hwmon(sys_block, path) {
                Some(input) => DiskTemperature::Hwmon(input),
                None => DiskTemperature::Smartctl,
            };
            debug!(disk = %name, source = ?temperature, "disk temperature source");
            disks.push(Disk { name, temperature });
        }

        let smartctl = Smartctl::new(&section.smartctl_path);
        let guard = if section.standby_guard_enabled && disks.len() == 1 {
            warn!("Standby guard is disabled ([{}] has one disk)", HD_ZONE_NAME);
            None
        } else if section.standby_guard_enabled {
            Some(StandbyGuard::new(
                disks.iter().map(|d| d.name.clone()).collect(),
                section.standby_hd_limit as usize,
                smartctl.clone(),
            )?)
        } else {
            None
        };

        info!(target: CONFIG_LOG_TARGET, "   smartctl_path = {}", smartctl.path().display());
        match &guard {
            Some(_) => {
                info!(target: CONFIG_LOG_TARGET, "   Standby guard is enabled:");
                info!(target: CONFIG_LOG_TARGET, "     standby_hd_limit = {}", section.standby_hd_limit);
            }
            None => info!(target: CONFIG_LOG_TARGET, "   Standby guard is disabled"),
        }

        Ok(Self {
            disks,
            smartctl,
            guard,
        })
    }

    pub fn disks(&self) -> &[Disk] {
        &self.disks
    }

    pub fn standby_guard(&self) -> Option<&StandbyGuard<Smartctl>> {
        self.guard.as_ref()
    }

    /// Build the HD zone controller from its configuration section
    pub fn from_config(section: &HdZoneSection, sys_block: &Path) -> Result<ZoneController> {
        let settings = section.zone.settings(HD_ZONE_NAME, &HD_ZONE_DEFAULTS)?;
        let zone = Self::new(section, sys_block)?;
        ZoneController::new(settings, Box::new(zone))
    }
}

impl TemperatureSource for HdZone {
    fn sensor_count(&self) -> usize {
        self.disks.len()
    }

    fn read(&mut self, index: usize, _now: Instant) -> Result<f32> {
        let disk = self.disks.get(index).ok_or(ZoneFanError::SensorIndex {
            index,
            count: self.disks.len(),
        })?;
        match &disk.temperature {
            DiskTemperature::Hwmon(input) => {
                let raw = hwmon::read_trimmed(input).map_err(|e| {
                    ZoneFanError::sensor_unavailable(index, disk.name.clone(), e.to_string())
                })?;
                hwmon::parse_millidegrees(&raw).ok_or_else(|| ZoneFanError::SensorParse {
                    index,
                    device: disk.name.clone(),
                    value: raw,
                })
            }
            DiskTemperature::Smartctl => self.smartctl.temperature(&disk.name),
        }
    }

    fn before_cycle(&mut self, now: Instant) -> Result<()> {
        if let Some(guard) = self.guard.as_mut() {
            guard.check(now)?;
        }
        Ok(())
    }

    fn describe(&self) -> Vec<String> {
        self.disks.iter().map(|d| d.name.clone()).collect()
    }
}
