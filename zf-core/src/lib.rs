//! zonefan core library
//!
//! Zone based fan control for IPMI servers. Temperatures of CPU, disk and
//! GPU zones are mapped onto stepped fan levels and sent to the board's fan
//! controller through `ipmitool`.
//!
//! # Module Structure
//!
//! - `engine/` - zone controller, step curve, reading cache
//! - `hw/` - sensor sources (hwmon, DRM, smartctl) and the IPMI actuator
//! - `settings` - JSON configuration schema
//! - `validation` - configuration value parsing
//! - `system` - runtime dependency checks
//!
//! # Example
//!
//! ```no_run
//! use std::time::Instant;
//! use zf_core::{load_config, build_zones, Ipmi};
//!
//! let config = load_config("/etc/zonefan/zonefan.json").unwrap();
//! let mut ipmi = Ipmi::new(config.ipmi.clone());
//! let mut zones = build_zones(&config).unwrap();
//! for zone in &mut zones {
//!     let _ = zone.run(Instant::now(), &mut ipmi);
//! }
//! ```

pub mod engine;
pub mod hw;

pub mod constants;
pub mod error;
pub mod settings;
pub mod system;
pub mod validation;

pub use engine::{
    ActuatorSink, CalcMode, CycleOutcome, SensorReading, StepCurve, TemperatureSource,
    ZoneController, ZoneSettings, ZoneTemperatureCache,
};
pub use error::{Result, ZoneFanError};
pub use hw::{
    cpu::CpuZone,
    disk::{HdZone, StandbyGuard},
    gpu::{DrmHwmonSource, GpuZone},
    ipmi::{FanMode, Ipmi},
};
pub use settings::{
    build_zones, load_config, parse_config, DaemonConfig, GpuZoneSection, HdZoneSection,
    IpmiSection, ZoneSection,
};
pub use system::check_dependencies;
pub use validation::parse_device_ids;
