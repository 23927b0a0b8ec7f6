//! Configuration module for monitoring sessions.
//!
//! # Module Structure
//!
//! - `loader`: Handles loading settings from JSON files and the global settings path
//!
//! # Settings Management
//!
//! The `SettingsManager` provides thread-safe access to `MonitorSettings`:
//! - Uses `Arc<RwLock<MonitorSettings>>` for parallel reads
//! - Persists state to `~/.config/stressmon/settings.json`
//!
//! The `ReportFormat` table holds the marker strings of the stress tool's
//! human-readable status report. Devices with a different report layout can
//! override it in the settings file without code changes.

pub mod loader;

use crate::error::ConfigError;
use crate::monitor::patterns::PatternTable;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const MAX_CORE_COUNT: u32 = 1024;
/// Upper bound for the second-valued intervals, one day
const MAX_INTERVAL_SECS: f64 = 86_400.0;

/// Marker strings and field patterns of the device status report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportFormat {
    /// Literal line prefixes that open a new measurement block
    pub block_start_prefixes: Vec<String>,
    /// Overall CPU percent; value in capture group 1
    pub cpu_overall: String,
    /// Per-core CPU percent; core id in group 1, value in group 2
    pub cpu_core: String,
    /// DRAM percent; value in group 1
    pub dram: String,
    /// GPU percent; value in group 1. Also terminates the block.
    pub gpu: String,
}

impl Default for ReportFormat {
    fn default() -> Self {
        ReportFormat {
            block_start_prefixes: vec![
                "[Monitor] CPU Usage (per core):".to_string(),
                "=== Monitor: CPU Usage (per core) ===".to_string(),
            ],
            cpu_overall: r"(?i)^\s*cpu:\s*([0-9]+(?:\.[0-9]+)?)\s*%".to_string(),
            cpu_core: r"(?i)^\s*(?:cpu|core\s*)(\d+):\s*([0-9]+(?:\.[0-9]+)?)\s*%".to_string(),
            dram: r"(?i)^\s*(?:\[Monitor\]\s*)?DRAM\s*usage:\s*([0-9]+(?:\.[0-9]+)?)\s*%".to_string(),
            gpu: r"(?i)^\s*(?:\[Monitor\]\s*)?GPU\s*usage:\s*([0-9]+(?:\.[0-9]+)?)\s*%".to_string(),
        }
    }
}

/// Settings for the tail/segment/pace pipeline and its transports.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Spacing of synthetic timestamps and minimum wall-clock gap between emissions
    pub block_interval_secs: f64,
    /// Pacer timer period
    pub pacer_tick_ms: u64,
    /// Local file poll period
    pub poll_interval_ms: u64,
    /// Number of per-core series kept by the store
    pub core_count: u32,
    /// Line fragment that signals the stress tool finished
    pub completion_marker: String,
    /// Upper bound of the in-memory raw log, in bytes
    pub raw_log_capacity: usize,

    // Remote (ADB) tail
    pub adb_path: String,
    pub adb_serial: Option<String>,
    pub remote_status_path: String,
    pub remote_wait_secs: f64,

    /// Setting the CPU target also moves every core target
    pub link_core_targets: bool,

    pub report_format: ReportFormat,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings {
            block_interval_secs: 5.0,
            pacer_tick_ms: 250,
            poll_interval_ms: 500,
            core_count: 8,
            completion_marker: "Stress test completed".to_string(),
            raw_log_capacity: 256 * 1024,
            adb_path: "adb".to_string(),
            adb_serial: None,
            remote_status_path: "/tmp/android_stress_tool/stress_tool_status.txt".to_string(),
            remote_wait_secs: 0.5,
            link_core_targets: true,
            report_format: ReportFormat::default(),
        }
    }
}

impl MonitorSettings {
    pub fn block_interval(&self) -> Duration {
        Duration::from_secs_f64(self.block_interval_secs)
    }

    pub fn pacer_tick(&self) -> Duration {
        Duration::from_millis(self.pacer_tick_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check value ranges and compile the report patterns.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_interval_secs("block_interval_secs", self.block_interval_secs)?;
        if self.pacer_tick_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "pacer_tick_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.core_count > MAX_CORE_COUNT {
            return Err(ConfigError::ValidationFailed(format!(
                "core_count {} exceeds limit {}",
                self.core_count, MAX_CORE_COUNT
            )));
        }
        check_interval_secs("remote_wait_secs", self.remote_wait_secs)?;
        PatternTable::compile(&self.report_format)?;
        Ok(())
    }

    pub fn remote_wait(&self) -> Duration {
        Duration::from_secs_f64(self.remote_wait_secs)
    }
}

fn check_interval_secs(name: &str, secs: f64) -> Result<(), ConfigError> {
    if !secs.is_finite() || secs <= 0.0 || secs > MAX_INTERVAL_SECS {
        return Err(ConfigError::ValidationFailed(format!(
            "{} must be in (0, {}], got {}",
            name, MAX_INTERVAL_SECS, secs
        )));
    }
    Ok(())
}

/// Thread-safe manager for monitor settings
#[derive(Clone)]
pub struct SettingsManager {
    settings: Arc<RwLock<MonitorSettings>>,
    path: PathBuf,
}

impl SettingsManager {
    /// Load settings from `path`, falling back to defaults when the file is missing
    pub fn open(path: PathBuf) -> Result<Self, ConfigError> {
        let settings = loader::load_or_default(&path)?;
        Ok(SettingsManager {
            settings: Arc::new(RwLock::new(settings)),
            path,
        })
    }

    pub fn get(&self) -> Result<MonitorSettings, ConfigError> {
        self.settings
            .read()
            .map(|s| s.clone())
            .map_err(|e| ConfigError::ValidationFailed(format!("Settings lock poisoned: {}", e)))
    }

    /// Validate, store and persist new settings
    pub fn update(&self, settings: MonitorSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        loader::save_settings_to_file(&settings, &self.path)?;
        let mut guard = self
            .settings
            .write()
            .map_err(|e| ConfigError::ValidationFailed(format!("Settings lock poisoned: {}", e)))?;
        *guard = settings;
        log::info!("[Config] Settings updated: {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = MonitorSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.block_interval(), Duration::from_secs(5));
        assert_eq!(settings.pacer_tick(), Duration::from_millis(250));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let settings = MonitorSettings {
            block_interval_secs: 0.0,
            ..MonitorSettings::default()
        };
        assert!(matches!(settings.validate(), Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_validate_rejects_intervals_too_large_for_duration() {
        for secs in [1e20, f64::INFINITY, f64::NAN, MAX_INTERVAL_SECS + 1.0] {
            let settings = MonitorSettings {
                block_interval_secs: secs,
                ..MonitorSettings::default()
            };
            assert!(matches!(settings.validate(), Err(ConfigError::ValidationFailed(_))));

            let settings = MonitorSettings {
                remote_wait_secs: secs,
                ..MonitorSettings::default()
            };
            assert!(matches!(settings.validate(), Err(ConfigError::ValidationFailed(_))));
        }

        let longest = MonitorSettings {
            block_interval_secs: MAX_INTERVAL_SECS,
            remote_wait_secs: MAX_INTERVAL_SECS,
            ..MonitorSettings::default()
        };
        assert!(longest.validate().is_ok());
        assert_eq!(longest.block_interval(), Duration::from_secs(86_400));
        assert_eq!(longest.remote_wait(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut settings = MonitorSettings::default();
        settings.report_format.gpu = "GPU usage: ([0-9".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: MonitorSettings =
            serde_json::from_str(r#"{"core_count": 4, "block_interval_secs": 2.5}"#).unwrap();
        assert_eq!(settings.core_count, 4);
        assert_eq!(settings.block_interval_secs, 2.5);
        assert_eq!(settings.pacer_tick_ms, 250);
        assert_eq!(settings.report_format, ReportFormat::default());
    }

    #[test]
    fn test_settings_manager_update_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.json");
        let manager = SettingsManager::open(path.clone()).unwrap();
        assert_eq!(manager.get().unwrap(), MonitorSettings::default());

        let mut changed = manager.get().unwrap();
        changed.core_count = 2;
        manager.update(changed).unwrap();

        let reopened = SettingsManager::open(path).unwrap();
        assert_eq!(reopened.get().unwrap().core_count, 2);
    }

    #[test]
    fn test_settings_manager_rejects_invalid_update() {
        let temp = TempDir::new().unwrap();
        let manager = SettingsManager::open(temp.path().join("settings.json")).unwrap();
        let bad = MonitorSettings {
            pacer_tick_ms: 0,
            ..MonitorSettings::default()
        };
        assert!(manager.update(bad).is_err());
        assert_eq!(manager.get().unwrap().pacer_tick_ms, 250);
    }
}
