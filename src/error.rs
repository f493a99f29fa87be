use thiserror::Error;

/// The single error type returned across every public API boundary in this crate.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Pool exhausted: no worker became available before the deadline")]
    PoolExhausted,

    #[error(
        "profile '{profile}' is locked by a live process (pid {pid:?}); retry with kill_orphaned=true to reclaim it"
    )]
    ProfileLocked { profile: String, pid: Option<u32> },

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Operation timed out after {0:?}")]
    TimeoutError(std::time::Duration),

    #[error("Script forbidden: {0}")]
    ScriptForbidden(String),

    #[error("Health check failed for instance {0}")]
    HealthFailed(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// Machine-readable, stable error code for programmatic dispatch by callers
    /// that want to branch on kind without matching the Display string.
    pub fn code(&self) -> &'static str {
        match self {
            FleetError::Io(_) => "Io",
            FleetError::Config(_) | FleetError::TomlSerialize(_) | FleetError::TomlDeserialize(_) | FleetError::Json(_) => "Config",
            FleetError::LaunchFailed(_) => "LaunchFailed",
            FleetError::PoolExhausted => "PoolExhausted",
            FleetError::ProfileLocked { .. } => "ProfileLocked",
            FleetError::ProfileNotFound(_) => "ProfileNotFound",
            FleetError::ProfileExists(_) => "ProfileExists",
            FleetError::SessionNotFound(_) => "SessionNotFound",
            FleetError::InstanceNotFound(_) => "InstanceNotFound",
            FleetError::NavigationFailed(_) => "NavigationFailed",
            FleetError::TimeoutError(_) => "TimeoutError",
            FleetError::ScriptForbidden(_) => "ScriptForbidden",
            FleetError::HealthFailed(_) => "HealthFailed",
            FleetError::Driver(_) => "Driver",
            FleetError::Validation(_) => "Validation",
        }
    }

    /// Whether retrying the same call is expected to eventually succeed.
    pub fn retryable(&self) -> bool {
        matches!(self, FleetError::PoolExhausted | FleetError::NavigationFailed(_) | FleetError::TimeoutError(_))
    }
}
