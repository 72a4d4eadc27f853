//! Per-sensor temperature cache
//!
//! Bounds how often a zone touches its physical sensors, independently of how
//! often the control loop runs. One slot per position in the zone's sensor
//! list, allocated once at construction.

use std::time::{Duration, Instant};

use crate::error::{Result, ZoneFanError};

/// Last poll of one sensor
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReading {
    /// When the sensor was last read, `None` if never polled
    pub polled_at: Option<Instant>,
    /// Last observed temperature in Celsius (0.0 until the first poll)
    pub value: f32,
}

impl SensorReading {
    /// Whether this reading may be reused at `now`
    pub fn is_fresh(&self, now: Instant, polling: Duration) -> bool {
        match self.polled_at {
            Some(at) => now.saturating_duration_since(at) < polling,
            None => false,
        }
    }
}

/// Cache of the last reading of every sensor in a zone
#[derive(Debug, Clone)]
pub struct ZoneTemperatureCache {
    readings: Vec<SensorReading>,
    polling: Duration,
}

impl ZoneTemperatureCache {
    /// Create `count` never-polled slots
    pub fn new(count: usize, polling: Duration) -> Self {
        Self {
            readings: vec![SensorReading::default(); count],
            polling,
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn polling(&self) -> Duration {
        self.polling
    }

    /// Reading stored for `index`
    pub fn get(&self, index: usize) -> Result<&SensorReading> {
        self.readings.get(index).ok_or(ZoneFanError::SensorIndex {
            index,
            count: self.readings.len(),
        })
    }

    /// Cached value for `index` if it was polled less than one interval ago
    pub fn fresh(&self, index: usize, now: Instant) -> Result<Option<f32>> {
        let reading = self.get(index)?;
        Ok(reading
            .is_fresh(now, self.polling)
            .then_some(reading.value))
    }

    /// Record a new reading for `index`
    pub fn store(&mut self, index: usize, now: Instant, value: f32) -> Result<()> {
        let count = self.readings.len();
        let slot = self
            .readings
            .get_mut(index)
            .ok_or(ZoneFanError::SensorIndex { index, count })?;
        *slot = SensorReading {
            polled_at: Some(now),
            value,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_slots_are_never_polled() {
        let cache = ZoneTemperatureCache::new(3, Duration::from_secs(2));
        assert_eq!(cache.len(), 3);
        for i in 0..3 {
            let reading = cache.get(i).unwrap();
            assert_eq!(reading.polled_at, None);
            assert_eq!(reading.value, 0.0);
        }
        assert_eq!(cache.fresh(0, Instant::now()).unwrap(), None);
    }

    #[test]
    fn test_fresh_within_interval() {
        let mut cache = ZoneTemperatureCache::new(1, Duration::from_secs(2));
        let t0 = Instant::now();
        cache.store(0, t0, 61.5).unwrap();

        assert_eq!(cache.fresh(0, t0 + Duration::from_secs(1)).unwrap(), Some(61.5));
        assert_eq!(cache.fresh(0, t0 + Duration::from_secs(2)).unwrap(), None);
        assert_eq!(cache.fresh(0, t0 + Duration::from_secs(3)).unwrap(), None);
    }

    #[test]
    fn test_zero_polling_never_caches() {
        let mut cache = ZoneTemperatureCache::new(1, Duration::ZERO);
        let t0 = Instant::now();
        cache.store(0, t0, 40.0).unwrap();
        assert_eq!(cache.fresh(0, t0).unwrap(), None);
    }

    #[test]
    fn test_index_out_of_range() {
        let mut cache = ZoneTemperatureCache::new(2, Duration::from_secs(2));
        let err = cache.fresh(2, Instant::now()).unwrap_err();
        assert!(matches!(err, ZoneFanError::SensorIndex { index: 2, count: 2 }));
        assert!(cache.store(5, Instant::now(), 1.0).is_err());
    }
}
