//! Control loop
//!
//! Runs every enabled zone once per iteration, then waits half of the
//! shortest polling interval (at least 50 ms) or until shutdown is signalled.
//!
//! # Safety Features
//! - **Isolation**: a failing zone never stops the loop or the other zones
//! - **Error counting**: consecutive failures per zone, logged at the first
//!   and every 10th occurrence; sensor failures at warn, others at error
//! - **Fail-safe exit**: both IPMI zones go to 100% when the loop ends

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use zf_core::constants::{ipmi, timing};
use zf_core::{ActuatorSink, CycleOutcome, ZoneController};

/// Main loop wait for the given zone polling intervals
pub fn loop_wait(pollings: impl IntoIterator<Item = f32>) -> Duration {
    let shortest = pollings
        .into_iter()
        .filter(|p| p.is_finite())
        .fold(f32::INFINITY, f32::min);
    if !shortest.is_finite() {
        return timing::MIN_LOOP_WAIT;
    }
    Duration::try_from_secs_f32(shortest / 2.0)
        .unwrap_or(timing::MIN_LOOP_WAIT)
        .max(timing::MIN_LOOP_WAIT)
}

struct ZoneState {
    controller: ZoneController,
    consecutive_errors: u32,
}

/// Sequential scheduler over all enabled zones
pub struct ControlLoop {
    zones: Vec<ZoneState>,
    wait: Duration,
}

impl ControlLoop {
    pub fn new(zones: Vec<ZoneController>) -> Self {
        let wait = loop_wait(zones.iter().map(|z| z.settings().polling));
        let zones = zones
            .into_iter()
            .map(|controller| ZoneState {
                controller,
                consecutive_errors: 0,
            })
            .collect();
        Self { zones, wait }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Consecutive failures of the zone at `index`
    pub fn consecutive_errors(&self, index: usize) -> Option<u32> {
        self.zones.get(index).map(|z| z.consecutive_errors)
    }

    /// Run every zone once
    pub fn run_cycle(&mut self, now: Instant, sink: &mut dyn ActuatorSink) {
        for zone in &mut self.zones {
            match zone.controller.run(now, sink) {
                Ok(outcome) => {
                    if zone.consecutive_errors > 0 {
                        info!(
                            zone = %zone.controller.name(),
                            "recovered after {} errors", zone.consecutive_errors
                        );
                        zone.consecutive_errors = 0;
                    }
                    if let CycleOutcome::Unchanged { temperature, level } = outcome {
                        debug!(zone = %zone.controller.name(), "level {}% kept at {:.1}C", level, temperature);
                    }
                }
                Err(e) => {
                    zone.consecutive_errors += 1;
                    let count = zone.consecutive_errors;
                    if count != 1 && count % timing::MAX_CONSECUTIVE_ERRORS != 0 {
                        continue;
                    }
                    // the zone keeps its last level either way
                    if e.is_sensor_error() {
                        warn!(zone = %zone.controller.name(), "sensor read failed (count: {}): {}", count, e);
                    } else {
                        error!(zone = %zone.controller.name(), "cycle failed (count: {}): {}", count, e);
                    }
                }
            }
        }
    }

    /// Loop until a message arrives on `shutdown` or its sender is gone
    pub fn run(&mut self, sink: &mut dyn ActuatorSink, shutdown: &Receiver<()>) {
        debug!("Main loop wait time = {:?}", self.wait);
        loop {
            self.run_cycle(Instant::now(), sink);
            match shutdown.recv_timeout(self.wait) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Control loop stopped");
    }
}

/// Put both IPMI zones to full speed
pub fn restore_full_speed(sink: &mut dyn ActuatorSink) {
    for zone in [ipmi::CPU_ZONE, ipmi::HD_ZONE] {
        if let Err(e) = sink.set_fan_level(zone, ipmi::SAFE_LEVEL) {
            warn!("Failed to set IPMI zone {} to {}%: {}", zone, ipmi::SAFE_LEVEL, e);
        }
    }
    info!("All fans are switched back to {}% speed", ipmi::SAFE_LEVEL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::predicate::eq;
    use std::sync::mpsc;
    use zf_core::{CalcMode, TemperatureSource, ZoneSettings};
    use zf_error::ZoneFanError;

    mock! {
        Source {}
        impl TemperatureSource for Source {
            fn sensor_count(&self) -> usize;
            fn read(&mut self, index: usize, now: Instant) -> zf_core::Result<f32>;
            fn before_cycle(&mut self, now: Instant) -> zf_core::Result<()>;
            fn describe(&self) -> Vec<String>;
        }
    }

    mock! {
        Sink {}
        impl ActuatorSink for Sink {
            fn set_fan_level(&mut self, zone: u8, level: u8) -> zf_core::Result<()>;
        }
    }

    fn settings(name: &str, ipmi_zone: u8, polling: f32) -> ZoneSettings {
        ZoneSettings {
            name: name.to_string(),
            ipmi_zone,
            calc: CalcMode::Average,
            steps: 5,
            sensitivity: 2.0,
            polling,
            min_temp: 40.0,
            max_temp: 70.0,
            min_level: 35,
            max_level: 100,
        }
    }

    fn zone(name: &str, ipmi_zone: u8, polling: f32, temp: Option<f32>) -> ZoneController {
        let mut source = MockSource::new();
        source.expect_sensor_count().return_const(1usize);
        source.expect_describe().returning(|| vec!["mock".to_string()]);
        source.expect_before_cycle().returning(|_| Ok(()));
        source.expect_read().returning(move |index, _| match temp {
            Some(t) => Ok(t),
            None => Err(ZoneFanError::sensor_unavailable(index, "card9", "gone")),
        });
        ZoneController::new(settings(name, ipmi_zone, polling), Box::new(source)).unwrap()
    }

    #[test]
    fn test_loop_wait() {
        assert_eq!(loop_wait([2.0, 10.0]), Duration::from_secs(1));
        assert_eq!(loop_wait([10.0]), Duration::from_secs(5));
        assert_eq!(loop_wait([0.0]), timing::MIN_LOOP_WAIT);
        assert_eq!(loop_wait(Vec::new()), timing::MIN_LOOP_WAIT);
        assert_eq!(loop_wait([-4.0]), timing::MIN_LOOP_WAIT);
        assert_eq!(loop_wait([1e20]), timing::MIN_LOOP_WAIT);
    }

    #[test]
    fn test_failing_zone_does_not_block_others() {
        let mut control = ControlLoop::new(vec![
            zone("GPU zone", 1, 2.0, None),
            zone("CPU zone", 0, 2.0, Some(70.0)),
        ]);
        assert_eq!(control.wait(), Duration::from_secs(1));

        let mut sink = MockSink::new();
        sink.expect_set_fan_level()
            .with(eq(0), eq(100))
            .times(1)
            .returning(|_, _| Ok(()));

        let t0 = Instant::now();
        control.run_cycle(t0, &mut sink);
        control.run_cycle(t0 + Duration::from_secs(2), &mut sink);
        assert_eq!(control.consecutive_errors(0), Some(2));
        assert_eq!(control.consecutive_errors(1), Some(0));
    }

    #[test]
    fn test_actuator_failures_are_counted_until_recovery() {
        let mut control = ControlLoop::new(vec![zone("HD zone", 1, 2.0, Some(46.0))]);
        let mut failing = MockSink::new();
        failing
            .expect_set_fan_level()
            .times(10)
            .returning(|_, _| Err(ZoneFanError::ipmi("exit status 1")));

        let t0 = Instant::now();
        for cycle in 0..10u64 {
            control.run_cycle(t0 + Duration::from_secs(2 * cycle), &mut failing);
        }
        assert_eq!(control.consecutive_errors(0), Some(10));

        let mut working = MockSink::new();
        working
            .expect_set_fan_level()
            .with(eq(1), eq(48))
            .times(1)
            .returning(|_, _| Ok(()));
        control.run_cycle(t0 + Duration::from_secs(20), &mut working);
        assert_eq!(control.consecutive_errors(0), Some(0));
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let mut control = ControlLoop::new(vec![zone("CPU zone", 0, 2.0, Some(52.0))]);
        let mut sink = MockSink::new();
        sink.expect_set_fan_level()
            .with(eq(0), eq(61))
            .times(1)
            .returning(|_, _| Ok(()));

        let (tx, rx) = mpsc::channel();
        tx.send(()).unwrap();
        control.run(&mut sink, &rx);
    }

    #[test]
    fn test_restore_full_speed() {
        let mut sink = MockSink::new();
        sink.expect_set_fan_level()
            .with(eq(ipmi::CPU_ZONE), eq(100))
            .times(1)
            .returning(|_, _| Err(ZoneFanError::ipmi("exit status 1")));
        sink.expect_set_fan_level()
            .with(eq(ipmi::HD_ZONE), eq(100))
            .times(1)
            .returning(|_, _| Ok(()));
        restore_full_speed(&mut sink);
    }
}
