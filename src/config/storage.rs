use crate::config::schema::AppConfig;
use crate::error::{FleetError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration file path based on platform.
pub fn get_config_path() -> PathBuf {
    let config_dir = if cfg!(target_os = "linux") {
        dirs::config_dir()
            .map(|p| p.join("fleetbrowse"))
            .unwrap_or_else(|| PathBuf::from("."))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|p| p.join("com.fleetbrowse.app"))
            .unwrap_or_else(|| PathBuf::from("."))
    } else if cfg!(target_os = "windows") {
        dirs::config_dir()
            .map(|p| p.join("fleetbrowse"))
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        PathBuf::from(".")
    };

    config_dir.join("config.toml")
}

/// Load configuration from file, creating a default one if none exists yet.
pub fn load_config() -> Result<AppConfig> {
    let config_path = get_config_path();

    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, creating default", config_path);
        return init_config();
    }

    let content = fs::read_to_string(&config_path)
        .map_err(|e| FleetError::Config(format!("failed to read config from {:?}: {}", config_path, e)))?;

    let config: AppConfig = toml::from_str(&content)?;

    tracing::info!("Loaded config from {:?}", config_path);
    Ok(config)
}

/// Save configuration to file, atomically (write to a temp sibling, then rename).
pub fn save_config(config: &AppConfig) -> Result<()> {
    let config_path = get_config_path();
    let content = toml::to_string_pretty(config)?;
    atomic_write(&config_path, content.as_bytes())?;
    tracing::info!("Saved config to {:?}", config_path);
    Ok(())
}

/// Initialize default configuration and persist it.
pub fn init_config() -> Result<AppConfig> {
    let config = AppConfig::default();
    save_config(&config)?;
    Ok(config)
}

/// Write `contents` to `path` via a temp file in the same directory followed
/// by a rename, so a reader never observes a partially-written file and a
/// crash mid-write never corrupts the previous contents. Used for every
/// catalog (profiles, sessions) and the app config itself.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| FleetError::Config(format!("{:?} has no parent directory", path)))?;
    fs::create_dir_all(parent).map_err(|e| FleetError::Config(format!("failed to create directory {:?}: {}", parent, e)))?;

    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("fleetbrowse");
    let tmp = parent.join(format!(".{}.tmp-{}", file_name, std::process::id()));
    fs::write(&tmp, contents).map_err(|e| FleetError::Config(format!("failed to write {:?}: {}", tmp, e)))?;
    fs::rename(&tmp, path).map_err(|e| FleetError::Config(format!("failed to rename {:?} -> {:?}: {}", tmp, path, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path() {
        let path = get_config_path();
        assert!(path.ends_with("config.toml"));
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.pool.min, 0);
        assert_eq!(config.pool.max, 4);
        assert!(!config.pool.close_tabs_on_hibernation);
    }

    #[test]
    fn test_default_config_roundtrips_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).expect("serialize");
        let back: AppConfig = toml::from_str(&text).expect("deserialize");
        assert_eq!(back.pool.max, config.pool.max);
        assert_eq!(back.storage.profiles_dir, config.storage.profiles_dir);
    }

    #[test]
    fn test_atomic_write_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }
}
