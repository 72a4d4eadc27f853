//! GPU zone
//!
//! GPU temperatures come from the hwmon nodes of the DRM card devices,
//! `/sys/class/drm/card<N>/device/hwmon/hwmon*/temp*_input`. A card may expose
//! several inputs (edge, junction, memory); the hottest one is the card's
//! temperature.
//!
//! Reads go through the zone's [`ZoneTemperatureCache`], so a card is touched
//! at most once per polling interval no matter how often the loop runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::hwmon;
use crate::constants::{CONFIG_LOG_TARGET, GPU_ZONE_DEFAULTS};
use crate::engine::{TemperatureSource, ZoneController, ZoneTemperatureCache};
use crate::error::{Result, ZoneFanError};
use crate::settings::{GpuZoneSection, GPU_ZONE_NAME};
use crate::validation::parse_device_ids;

/// One raw temperature input of a device
#[derive(Debug, Clone, PartialEq)]
pub struct RawInput {
    pub path: PathBuf,
    pub raw: String,
}

/// Access to the raw temperature inputs of a GPU device
#[cfg_attr(test, mockall::automock)]
pub trait SensorSource {
    /// Every temperature input of `device_id`, empty if it has none
    fn read_inputs(&self, device_id: u8) -> Result<Vec<RawInput>>;

    /// Device name for messages
    fn device_name(&self, device_id: u8) -> String {
        format!("card{device_id}")
    }
}

/// [`SensorSource`] over the sysfs DRM tree
#[derive(Debug, Clone)]
pub struct DrmHwmonSource {
    drm_root: PathBuf,
}

impl DrmHwmonSource {
    pub fn new(drm_root: impl Into<PathBuf>) -> Self {
        Self {
            drm_root: drm_root.into(),
        }
    }

    fn hwmon_parent(&self, device_id: u8) -> PathBuf {
        self.drm_root
            .join(format!("card{device_id}"))
            .join("device")
            .join("hwmon")
    }

    pub fn drm_root(&self) -> &Path {
        &self.drm_root
    }
}

impl SensorSource for DrmHwmonSource {
    fn read_inputs(&self, device_id: u8) -> Result<Vec<RawInput>> {
        let mut inputs = Vec::new();
        for dir in hwmon::hwmon_dirs(&self.hwmon_parent(device_id)) {
            for path in hwmon::temp_inputs(&dir) {
                let raw = fs::read_to_string(&path)
                    .map_err(|source| ZoneFanError::FileRead { path: path.clone(), source })?;
                inputs.push(RawInput { path, raw });
            }
        }
        Ok(inputs)
    }
}

/// Temperature source of the GPU zone
pub struct GpuZone<S> {
    device_ids: Vec<u8>,
    cache: ZoneTemperatureCache,
    source: S,
}

impl<S: SensorSource> GpuZone<S> {
    /// Zone over `device_ids` with one cache slot per id
    pub fn new(device_ids: Vec<u8>, polling: Duration, source: S) -> Self {
        let cache = ZoneTemperatureCache::new(device_ids.len(), polling);
        Self {
            device_ids,
            cache,
            source,
        }
    }

    pub fn device_ids(&self) -> &[u8] {
        &self.device_ids
    }

    pub fn cache(&self) -> &ZoneTemperatureCache {
        &self.cache
    }

    fn acquire(&self, index: usize, device_id: u8) -> Result<f32> {
        let device = self.source.device_name(device_id);
        let inputs = self.source.read_inputs(device_id).map_err(|e| match e {
            // an input vanished between listing and reading
            ZoneFanError::FileRead { path, source } => ZoneFanError::sensor_unavailable(
                index,
                device.clone(),
                format!("{}: {}", path.display(), source),
            ),
            other => other,
        })?;
        if inputs.is_empty() {
            return Err(ZoneFanError::sensor_unavailable(
                index,
                device,
                "no hwmon temperature inputs",
            ));
        }

        let mut hottest = f32::NEG_INFINITY;
        for input in &inputs {
            let value = hwmon::parse_millidegrees(&input.raw).ok_or_else(|| {
                ZoneFanError::SensorParse {
                    index,
                    device: input.path.display().to_string(),
                    value: input.raw.trim().to_string(),
                }
            })?;
            hottest = hottest.max(value);
        }
        debug!(device = %device, inputs = inputs.len(), "GPU temperature {:.1}C", hottest);
        Ok(hottest)
    }
}

impl<S: SensorSource + 'static> GpuZone<S> {
    /// Build the GPU zone controller from its configuration section
    pub fn from_config(section: &GpuZoneSection, source: S) -> Result<ZoneController> {
        let settings = section.zone.settings(GPU_ZONE_NAME, &GPU_ZONE_DEFAULTS)?;
        let device_ids = parse_device_ids(&section.gpu_device_ids)?;
        info!(target: CONFIG_LOG_TARGET, "   gpu_device_ids = {:?}", device_ids);

        let zone = GpuZone::new(device_ids, settings.polling_interval(), source);
        ZoneController::new(settings, Box::new(zone))
    }
}

impl<S: SensorSource> TemperatureSource for GpuZone<S> {
    fn sensor_count(&self) -> usize {
        self.device_ids.len()
    }

    fn read(&mut self, index: usize, now: Instant) -> Result<f32> {
        if let Some(value) = self.cache.fresh(index, now)? {
            return Ok(value);
        }
        let device_id = *self.device_ids.get(index).ok_or(ZoneFanError::SensorIndex {
            index,
            count: self.device_ids.len(),
        })?;

        let value = self.acquire(index, device_id)?;
        self.cache.store(index, now, value)?;
        Ok(value)
    }

    fn describe(&self) -> Vec<String> {
        self.device_ids
            .iter()
            .map(|id| self.source.device_name(*id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use tempfile::TempDir;

    fn raw(values: &[&str]) -> Vec<RawInput> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| RawInput {
                path: PathBuf::from(format!("temp{}_input", i + 1)),
                raw: format!("{v}\n"),
            })
            .collect()
    }

    fn mock_source() -> MockSensorSource {
        let mut source = MockSensorSource::new();
        source
            .expect_device_name()
            .returning(|id| format!("card{id}"));
        source
    }

    #[test]
    fn test_hottest_input_wins() {
        let mut source = mock_source();
        source
            .expect_read_inputs()
            .with(eq(3))
            .returning(|_| Ok(raw(&["45000", "52000", "38000"])));

        let mut zone = GpuZone::new(vec![3], Duration::from_secs(2), source);
        assert_eq!(zone.read(0, Instant::now()).unwrap(), 52.0);
    }

    #[test]
    fn test_reads_are_cached_within_polling() {
        let mut source = mock_source();
        source
            .expect_read_inputs()
            .with(eq(0))
            .times(2)
            .returning(|_| Ok(raw(&["61000"])));

        let mut zone = GpuZone::new(vec![0], Duration::from_secs(2), source);
        let t0 = Instant::now();
        assert_eq!(zone.read(0, t0).unwrap(), 61.0);
        assert_eq!(zone.read(0, t0 + Duration::from_millis(500)).unwrap(), 61.0);
        assert_eq!(zone.read(0, t0 + Duration::from_secs(1)).unwrap(), 61.0);
        assert_eq!(zone.read(0, t0 + Duration::from_secs(2)).unwrap(), 61.0);
    }

    #[test]
    fn test_missing_sensor_is_an_error() {
        let mut source = mock_source();
        source.expect_read_inputs().returning(|_| Ok(Vec::new()));

        let mut zone = GpuZone::new(vec![0, 7], Duration::from_secs(2), source);
        let err = zone.read(1, Instant::now()).unwrap_err();
        match err {
            ZoneFanError::SensorUnavailable { index, device, .. } => {
                assert_eq!(index, 1);
                assert_eq!(device, "card7");
            }
            other => panic!("unexpected error {other:?}"),
        }
        // nothing was cached
        assert_eq!(zone.cache().get(1).unwrap().polled_at, None);
    }

    #[test]
    fn test_vanished_input_is_unavailable() {
        let mut source = mock_source();
        source.expect_read_inputs().returning(|_| {
            Err(ZoneFanError::FileRead {
                path: PathBuf::from("/sys/class/drm/card2/device/hwmon/hwmon3/temp1_input"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            })
        });

        let mut zone = GpuZone::new(vec![2], Duration::from_secs(2), source);
        let err = zone.read(0, Instant::now()).unwrap_err();
        assert!(err.is_sensor_error());
        match err {
            ZoneFanError::SensorUnavailable { index, device, reason } => {
                assert_eq!(index, 0);
                assert_eq!(device, "card2");
                assert!(reason.contains("temp1_input"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unparsable_input_aborts_read() {
        let mut source = mock_source();
        source
            .expect_read_inputs()
            .returning(|_| Ok(raw(&["45000", "garbage"])));

        let mut zone = GpuZone::new(vec![0], Duration::from_secs(2), source);
        let err = zone.read(0, Instant::now()).unwrap_err();
        assert!(matches!(err, ZoneFanError::SensorParse { index: 0, .. }));
        assert!(err.is_sensor_error());
    }

    #[test]
    fn test_index_out_of_range() {
        let source = mock_source();
        let mut zone = GpuZone::new(vec![0, 1], Duration::from_secs(2), source);
        let err = zone.read(2, Instant::now()).unwrap_err();
        assert!(matches!(err, ZoneFanError::SensorIndex { index: 2, count: 2 }));
    }

    #[test]
    fn test_cache_matches_device_list() {
        let zone = GpuZone::new(vec![0, 1, 4], Duration::from_secs(2), mock_source());
        assert_eq!(zone.sensor_count(), 3);
        assert_eq!(zone.cache().len(), 3);
        assert_eq!(zone.describe(), vec!["card0", "card1", "card4"]);
    }

    #[test]
    fn test_drm_source_reads_all_hwmon_inputs() {
        let dir = TempDir::new().unwrap();
        let hwmon = dir.path().join("card1/device/hwmon/hwmon5");
        fs::create_dir_all(&hwmon).unwrap();
        fs::write(hwmon.join("temp1_input"), "48000\n").unwrap();
        fs::write(hwmon.join("temp2_input"), "67000\n").unwrap();
        fs::write(hwmon.join("temp1_label"), "edge\n").unwrap();

        let source = DrmHwmonSource::new(dir.path());
        let inputs = source.read_inputs(1).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[1].raw, "67000\n");
        assert!(source.read_inputs(0).unwrap().is_empty());

        let mut zone = GpuZone::new(vec![1], Duration::from_secs(2), source);
        assert_eq!(zone.read(0, Instant::now()).unwrap(), 67.0);
    }
}
