//! Runtime dependency checks
//!
//! Run once before the IPMI interface is touched, so a missing tool is
//! reported with a clear message instead of failing on the first cycle.

use std::fs;
use std::path::Path;

use crate::constants::{paths, sensors};
use crate::error::{Result, ZoneFanError};
use crate::settings::DaemonConfig;

/// Names of the loaded kernel modules in `/proc/modules` format
pub fn loaded_modules(proc_modules: &str) -> Vec<&str> {
    proc_modules
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .collect()
}

/// Check the tools and kernel modules the enabled zones need
///
/// `exists` decides whether a binary path is present.
pub fn check_dependencies(
    config: &DaemonConfig,
    proc_modules: &str,
    exists: impl Fn(&Path) -> bool,
) -> Result<()> {
    if !exists(&config.ipmi.command) {
        return Err(ZoneFanError::Dependency(format!(
            "ipmitool command cannot be found {}",
            config.ipmi.command.display()
        )));
    }

    let modules = loaded_modules(proc_modules);

    if config.cpu_zone.enabled
        && !sensors::CPU_HWMON_DRIVERS
            .iter()
            .any(|driver| modules.contains(driver))
    {
        return Err(ZoneFanError::Dependency(
            "coretemp or k10temp kernel module must be loaded".to_string(),
        ));
    }

    if config.hd_zone.zone.enabled
        && !modules.contains(&sensors::DRIVETEMP_MODULE)
        && !exists(&config.hd_zone.smartctl_path)
    {
        return Err(ZoneFanError::Dependency(format!(
            "drivetemp kernel module must be loaded or smartctl command must be installed ({})",
            config.hd_zone.smartctl_path.display()
        )));
    }

    Ok(())
}

/// Read the kernel module list, failing as a dependency error
pub fn read_proc_modules(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| {
        ZoneFanError::Dependency(format!("cannot read {}: {}", path.display(), e))
    })
}

/// [`check_dependencies`] against the running system
pub fn check_system_dependencies(config: &DaemonConfig) -> Result<()> {
    let proc_modules = read_proc_modules(Path::new(paths::PROC_MODULES))?;
    check_dependencies(config, &proc_modules, Path::exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::parse_config;

    const MODULES: &str = "\
coretemp 20480 0 - Live 0x0000000000000000
ipmi_si 86016 1 - Live 0x0000000000000000
";

    fn config(doc: &str) -> DaemonConfig {
        parse_config(doc).unwrap()
    }

    #[test]
    fn test_loaded_modules() {
        assert_eq!(loaded_modules(MODULES), vec!["coretemp", "ipmi_si"]);
    }

    #[test]
    fn test_unreadable_module_list_is_a_dependency_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("modules");
        let err = read_proc_modules(&missing).unwrap_err();
        assert!(matches!(err, ZoneFanError::Dependency(_)), "{err:?}");

        fs::write(&missing, MODULES).unwrap();
        assert_eq!(read_proc_modules(&missing).unwrap(), MODULES);
    }

    #[test]
    fn test_missing_ipmitool() {
        let err = check_dependencies(&config("{}"), MODULES, |_| false).unwrap_err();
        assert!(matches!(err, ZoneFanError::Dependency(_)));
    }

    #[test]
    fn test_cpu_zone_needs_driver() {
        let cpu = config(r#"{ "CPU zone": { "enabled": true } }"#);
        assert!(check_dependencies(&cpu, MODULES, |_| true).is_ok());
        assert!(check_dependencies(&cpu, "ipmi_si 1 0 - Live 0x0\n", |_| true).is_err());
    }

    #[test]
    fn test_hd_zone_needs_drivetemp_or_smartctl() {
        let hd = config(r#"{ "HD zone": { "enabled": true, "hd_names": "/dev/sda" } }"#);
        let ipmitool_only = |p: &Path| p == Path::new(paths::DEFAULT_IPMITOOL);

        assert!(check_dependencies(&hd, MODULES, ipmitool_only).is_err());
        assert!(check_dependencies(&hd, "drivetemp 1 0 - Live 0x0\n", ipmitool_only).is_ok());
        assert!(check_dependencies(&hd, MODULES, |_| true).is_ok());
    }
}
