pub mod schema;
pub mod storage;
pub mod validation;

pub use schema::{AppConfig, BrowserConfig, PoolConfig, ProfileMeta, ProfileRecord, SecurityConfig, SecurityLevel, StorageConfig};
pub use storage::{atomic_write, get_config_path, load_config, save_config};
pub use validation::{validate_chrome_path, validate_config, validate_profile_name};

/// Load and validate the config in one step; the loader never hands an
/// inconsistent `AppConfig` to a caller.
pub fn load_and_validate() -> crate::error::Result<AppConfig> {
    let config = load_config()?;
    validation::validate_config(&config)?;
    Ok(config)
}
