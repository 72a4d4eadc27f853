//! Hardware access
//!
//! - `hwmon` - sysfs hwmon helpers shared by the sensor sources
//! - `cpu` - CPU package temperatures (coretemp / k10temp)
//! - `disk` - disk temperatures (drivetemp / smartctl) and the standby guard
//! - `gpu` - GPU temperatures from DRM hwmon nodes
//! - `ipmi` - fan mode and fan level commands through ipmitool

pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod hwmon;
pub mod ipmi;
