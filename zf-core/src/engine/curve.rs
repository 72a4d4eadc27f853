//! Stepped temperature-to-level curve
//!
//! The curve is a staircase between `(min_temp, min_level)` and
//! `(max_temp, max_level)` with `steps` equal temperature bands. Inside the
//! range a temperature snaps to the nearest step and the step is scaled onto
//! the level range:
//!
//! ```text
//! gain  = round((T - min_temp) / temp_step)
//! level = round(gain * level_step) + min_level
//! ```
//!
//! Outside the range the level clamps to `min_level` / `max_level`.

/// Stepped duty curve for one zone
#[derive(Debug, Clone, PartialEq)]
pub struct StepCurve {
    min_temp: f32,
    max_temp: f32,
    min_level: u8,
    max_level: u8,
    steps: u32,
    temp_step: f32,
    level_step: f32,
}

impl StepCurve {
    /// Build a curve from already validated bounds
    ///
    /// Callers guarantee `steps >= 1`, `min_temp < max_temp` and
    /// `min_level <= max_level`.
    pub fn new(min_temp: f32, max_temp: f32, min_level: u8, max_level: u8, steps: u32) -> Self {
        let temp_step = (max_temp - min_temp) / steps as f32;
        let level_step = f32::from(max_level - min_level) / steps as f32;
        Self {
            min_temp,
            max_temp,
            min_level,
            max_level,
            steps,
            temp_step,
            level_step,
        }
    }

    /// Duty level for a zone temperature
    pub fn level_for(&self, temp: f32) -> u8 {
        if temp <= self.min_temp {
            return self.min_level;
        }
        if temp >= self.max_temp {
            return self.max_level;
        }
        let gain = ((temp - self.min_temp) / self.temp_step).round_ties_even();
        let level = (gain * self.level_step).round_ties_even() + f32::from(self.min_level);
        level.clamp(f32::from(self.min_level), f32::from(self.max_level)) as u8
    }

    /// Temperature and level at every step boundary, `steps + 1` rows
    pub fn mapping(&self) -> Vec<(f32, u8)> {
        (0..=self.steps)
            .map(|i| {
                let temp = self.min_temp + i as f32 * self.temp_step;
                let level = f32::from(self.min_level) + i as f32 * self.level_step;
                (temp, level as u8)
            })
            .collect()
    }

    pub fn temp_step(&self) -> f32 {
        self.temp_step
    }

    pub fn level_step(&self) -> f32 {
        self.level_step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu_curve() -> StepCurve {
        // 40..70 C over 5 steps: 6 C per step, 13 % per step
        StepCurve::new(40.0, 70.0, 35, 100, 5)
    }

    #[test]
    fn test_clamps_outside_range() {
        let curve = gpu_curve();
        assert_eq!(curve.level_for(20.0), 35);
        assert_eq!(curve.level_for(40.0), 35);
        assert_eq!(curve.level_for(70.0), 100);
        assert_eq!(curve.level_for(95.0), 100);
    }

    #[test]
    fn test_steps_inside_range() {
        let curve = gpu_curve();
        assert_eq!(curve.level_for(46.0), 48);
        assert_eq!(curve.level_for(52.0), 61);
        assert_eq!(curve.level_for(58.0), 74);
        assert_eq!(curve.level_for(64.0), 87);
        // 47.9 C is closer to step 1 than step 2
        assert_eq!(curve.level_for(47.9), 48);
        assert_eq!(curve.level_for(49.5), 61);
    }

    #[test]
    fn test_monotonic() {
        let curve = StepCurve::new(30.0, 60.0, 35, 100, 6);
        let mut previous = 0;
        let mut temp = 0.0;
        while temp <= 90.0 {
            let level = curve.level_for(temp);
            assert!(level >= previous, "level dropped at {temp}");
            previous = level;
            temp += 0.25;
        }
    }

    #[test]
    fn test_single_step() {
        let curve = StepCurve::new(30.0, 50.0, 20, 80, 1);
        assert_eq!(curve.level_for(35.0), 20);
        assert_eq!(curve.level_for(45.0), 80);
    }

    #[test]
    fn test_mapping_rows() {
        let curve = gpu_curve();
        let rows = curve.mapping();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], (40.0, 35));
        assert_eq!(rows[5], (70.0, 100));
        assert!((curve.temp_step() - 6.0).abs() < f32::EPSILON);
        assert!((curve.level_step() - 13.0).abs() < f32::EPSILON);
    }
}
