use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level, fully-resolved configuration object. Every recognized key lives
/// here as a field — there is no dynamic, string-keyed lookup anywhere in this
/// crate; an unknown key in the TOML file is simply ignored by serde rather
/// than silently accepted into some catch-all map.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    pub warm: usize,
    pub ttl_s: u64,
    pub health_interval_s: u64,
    pub hibernation_delay_s: u64,
    pub close_tabs_on_hibernation: bool,
    pub anti_detect_default: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: 4,
            warm: 1,
            ttl_s: 3600,
            health_interval_s: 30,
            hibernation_delay_s: 300,
            close_tabs_on_hibernation: false,
            anti_detect_default: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    pub profiles_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub downloads_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = default_data_dir();
        Self {
            profiles_dir: root.join("profiles"),
            sessions_dir: root.join("sessions"),
            downloads_dir: root.join("downloads"),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("fleetbrowse")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BrowserConfig {
    pub page_load_timeout_s: u64,
    pub implicit_wait_s: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_binary_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chromedriver_path: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            page_load_timeout_s: 30,
            implicit_wait_s: 5,
            chrome_binary_path: default_chrome_path(),
            chromedriver_path: None,
        }
    }
}

impl BrowserConfig {
    /// The chrome binary to launch: the configured path, or the platform
    /// default, or a bare `chrome` left to `$PATH` resolution as a last resort.
    pub fn resolve_chrome_path(&self) -> PathBuf {
        self.chrome_binary_path.clone().or_else(default_chrome_path).unwrap_or_else(|| PathBuf::from("chrome"))
    }
}

fn default_chrome_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        Some(PathBuf::from(
            "C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe",
        ))
    }
    #[cfg(target_os = "macos")]
    {
        Some(PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        ))
    }
    #[cfg(target_os = "linux")]
    {
        Some(PathBuf::from("/usr/bin/google-chrome"))
    }
}

/// Security-level preset selector. See `crate::launch::security` for the
/// statically tabulated flag/preference diff each level resolves to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Strict,
    #[default]
    Standard,
    Relaxed,
    Permissive,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct SecurityConfig {
    #[serde(default)]
    pub level: SecurityLevel,
}

/// On-disk record of a profile's metadata, keyed by profile name in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileMeta {
    pub description: String,
    pub created_at: u64,
    pub last_used: u64,
}

/// A profile record as returned by `ProfileRegistry::list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub name: String,
    pub description: String,
    pub created_at: u64,
    pub last_used: u64,
    pub exists: bool,
}
