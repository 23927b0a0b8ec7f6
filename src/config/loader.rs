//! Settings file loader and serialization.

use super::MonitorSettings;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the global settings path: ~/.config/stressmon/settings.json
pub fn get_global_settings_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine home directory".to_string())
    })?;

    Ok(home.join(".config/stressmon").join("settings.json"))
}

/// Load settings from a JSON file and validate them.
pub fn load_settings_from_file(path: &Path) -> Result<MonitorSettings, ConfigError> {
    validate_settings_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(format!("Settings file not found at: {}", path.display()))
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let settings: MonitorSettings =
        serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;
    settings.validate()?;

    log::debug!("[Config] Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load settings, or return defaults if the file does not exist yet.
pub fn load_or_default(path: &Path) -> Result<MonitorSettings, ConfigError> {
    match load_settings_from_file(path) {
        Err(ConfigError::FileNotFound(_)) => {
            log::info!("[Config] No settings at {}, using defaults", path.display());
            Ok(MonitorSettings::default())
        }
        other => other,
    }
}

/// Save settings to a JSON file, creating parent directories.
pub fn save_settings_to_file(settings: &MonitorSettings, path: &Path) -> Result<(), ConfigError> {
    validate_settings_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }
    }

    let json_content = serde_json::to_string_pretty(settings).map_err(ConfigError::InvalidJson)?;
    fs::write(path, json_content).map_err(ConfigError::IoError)?;

    Ok(())
}

/// Validate settings path (.json extension required).
pub fn validate_settings_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Settings path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => Ok(()),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Settings file must have .json extension, got .{}",
            ext.to_string_lossy()
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Settings file must have .json extension".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.json");

        let mut saved = MonitorSettings::default();
        saved.core_count = 16;
        saved.adb_serial = Some("emulator-5554".to_string());
        saved.report_format.block_start_prefixes = vec!["## cycle".to_string()];

        save_settings_to_file(&saved, &path).expect("Failed to save settings");
        let loaded = load_settings_from_file(&path).expect("Failed to load settings");

        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_validate_settings_path() {
        assert!(validate_settings_path(Path::new("settings.json")).is_ok());
        assert!(validate_settings_path(Path::new("settings.toml")).is_err());
        assert!(validate_settings_path(Path::new("settings")).is_err());
        assert!(validate_settings_path(Path::new("")).is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_settings_from_file(Path::new("/nonexistent/path/settings.json"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let settings = load_or_default(&temp_dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, MonitorSettings::default());
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("invalid.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"{ invalid json }").unwrap();

        let result = load_settings_from_file(&path);
        assert!(matches!(result, Err(ConfigError::InvalidJson(_))));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, r#"{"pacer_tick_ms": 0}"#).unwrap();

        let result = load_settings_from_file(&path);
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/dirs/settings.json");

        save_settings_to_file(&MonitorSettings::default(), &path).unwrap();
        assert!(path.exists());
    }
}
