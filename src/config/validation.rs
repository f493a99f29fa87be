use crate::config::schema::AppConfig;
use crate::error::{FleetError, Result};
use std::path::Path;

/// Validate a Chrome (or Chromium) executable path.
pub fn validate_chrome_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(FleetError::Validation(format!("Chrome executable not found at {:?}", path)));
    }

    if !path.is_file() {
        return Err(FleetError::Validation(format!("Chrome path {:?} is not a file", path)));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = path
            .metadata()
            .map_err(|e| FleetError::Validation(format!("cannot read Chrome file metadata: {}", e)))?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(FleetError::Validation(format!("Chrome executable {:?} is not executable", path)));
        }
    }

    Ok(())
}

/// Validate a fully-resolved `AppConfig` up front, the way the loader in
/// `config::storage` is expected to call this before handing the config to
/// the Fleet Manager — replacing any notion of discovering an invalid
/// setting lazily, deep inside a launch.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let pool = &config.pool;
    if pool.max == 0 {
        return Err(FleetError::Validation("pool.max must be at least 1".into()));
    }
    if pool.min > pool.max {
        return Err(FleetError::Validation(format!(
            "pool.min ({}) cannot exceed pool.max ({})",
            pool.min, pool.max
        )));
    }
    if pool.warm > pool.max {
        return Err(FleetError::Validation(format!(
            "pool.warm ({}) cannot exceed pool.max ({})",
            pool.warm, pool.max
        )));
    }
    if pool.health_interval_s == 0 {
        return Err(FleetError::Validation("pool.health_interval_s must be at least 1".into()));
    }

    let browser = &config.browser;
    if browser.page_load_timeout_s == 0 {
        return Err(FleetError::Validation("browser.page_load_timeout_s must be at least 1".into()));
    }
    if let Some(path) = &browser.chrome_binary_path {
        if path.as_os_str().is_empty() {
            return Err(FleetError::Validation("browser.chrome_binary_path cannot be empty".into()));
        }
    }

    if config.storage.profiles_dir.as_os_str().is_empty() {
        return Err(FleetError::Validation("storage.profiles_dir cannot be empty".into()));
    }
    if config.storage.sessions_dir.as_os_str().is_empty() {
        return Err(FleetError::Validation("storage.sessions_dir cannot be empty".into()));
    }

    Ok(())
}

/// Validate a proposed profile name before it is used as a directory basename.
pub fn validate_profile_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(FleetError::Validation("profile name cannot be empty".into()));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(FleetError::Validation(format!("profile name '{}' is not a valid directory basename", name)));
    }
    Ok(())
}
