//! sysfs hwmon helpers

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::constants::temperature::MILLIDEGREE_DIVISOR;

/// Read a sysfs attribute without its trailing newline
pub fn read_trimmed<P: AsRef<Path>>(path: P) -> io::Result<String> {
    Ok(fs::read_to_string(path)?.trim().to_string())
}

/// Convert a raw hwmon value in millidegrees to Celsius
pub fn parse_millidegrees(raw: &str) -> Option<f32> {
    let value: f64 = raw.trim().parse().ok()?;
    let celsius = (value / f64::from(MILLIDEGREE_DIVISOR)) as f32;
    celsius.is_finite().then_some(celsius)
}

/// `hwmon*` directories directly under `parent`, sorted by name
pub fn hwmon_dirs(parent: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(parent) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("hwmon"))
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

/// `temp*_input` files of one hwmon directory, sorted by name
pub fn temp_inputs(hwmon_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(hwmon_dir) else {
        return Vec::new();
    };
    let mut inputs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with("temp") && name.ends_with("_input")
        })
        .map(|e| e.path())
        .collect();
    inputs.sort();
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_millidegrees() {
        assert_eq!(parse_millidegrees("45000\n"), Some(45.0));
        assert_eq!(parse_millidegrees("-5500"), Some(-5.5));
        assert_eq!(parse_millidegrees("n/a"), None);
        assert_eq!(parse_millidegrees(""), None);
    }

    #[test]
    fn test_temp_inputs_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let hwmon = dir.path().join("hwmon3");
        fs::create_dir(&hwmon).unwrap();
        for name in ["temp2_input", "temp1_input", "temp1_label", "fan1_input", "name"] {
            fs::write(hwmon.join(name), "1\n").unwrap();
        }
        fs::write(dir.path().join("hwmon_stale"), "").unwrap();

        assert_eq!(hwmon_dirs(dir.path()), vec![hwmon.clone()]);
        assert_eq!(
            temp_inputs(&hwmon),
            vec![hwmon.join("temp1_input"), hwmon.join("temp2_input")]
        );
        assert_eq!(read_trimmed(hwmon.join("name")).unwrap(), "1");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        assert!(hwmon_dirs(Path::new("/nonexistent/zonefan")).is_empty());
        assert!(temp_inputs(Path::new("/nonexistent/zonefan")).is_empty());
    }
}
