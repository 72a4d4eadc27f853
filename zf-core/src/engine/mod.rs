//! Zone control engine
//!
//! - `curve` - stepped temperature to level mapping
//! - `cache` - per-sensor reading cache
//! - `controller` - zone controller and its collaborator traits

pub mod cache;
pub mod controller;
pub mod curve;

pub use cache::{SensorReading, ZoneTemperatureCache};
pub use controller::{
    ActuatorSink, CalcMode, CycleOutcome, TemperatureSource, ZoneController, ZoneSettings,
};
pub use curve::StepCurve;
