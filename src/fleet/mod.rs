//! Fleet Manager (component E): the top-level façade. Resolves "get a
//! browser" to either a pool worker or a standalone instance, tracks a
//! sticky "current instance" per logical client, and wires the Profile
//! Registry, Worker Pool, Process Reclamation, Script Validator, and Session
//! Store together behind one API.

use crate::config::schema::{AppConfig, ProfileRecord, SecurityLevel};
use crate::error::{FleetError, Result};
use crate::instance::{Instance, InstanceInfo, InstanceLauncher, RealInstanceLauncher};
use crate::launch::LaunchOptions;
use crate::pool::Pool;
use crate::profile::ProfileRegistry;
use crate::reclaim::ProcessReclaimer;
use crate::session::{RestoreReport, SessionStore, SessionSummary};
use crate::validator::ScriptValidator;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Request shape for `get_or_create`, matching the external interface table.
#[derive(Debug, Clone)]
pub struct GetOrCreateOptions {
    pub headless: bool,
    pub profile: Option<String>,
    pub anti_detect: bool,
    pub use_pool: bool,
    pub security_level: SecurityLevel,
    pub download_dir: Option<PathBuf>,
    pub kill_orphaned: Option<bool>,
    pub acquire_deadline: Duration,
}

impl Default for GetOrCreateOptions {
    fn default() -> Self {
        Self {
            headless: true,
            profile: None,
            anti_detect: false,
            use_pool: true,
            security_level: SecurityLevel::Standard,
            download_dir: None,
            kill_orphaned: None,
            acquire_deadline: Duration::from_secs(30),
        }
    }
}

impl GetOrCreateOptions {
    fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            headless: self.headless,
            profile: self.profile.clone(),
            extra_args: Vec::new(),
            anti_detect: self.anti_detect,
            security_level: self.security_level,
            download_dir: self.download_dir.clone(),
        }
    }
}

/// A single acquired browser, tagged with where it came from so `terminate`
/// knows whether to return it to the pool or tear it down outright.
enum Handle {
    Pooled(Arc<crate::pool::Worker>),
    Standalone(Arc<Instance>),
}

impl Handle {
    fn instance(&self) -> &Arc<Instance> {
        match self {
            Handle::Pooled(w) => &w.instance,
            Handle::Standalone(i) => i,
        }
    }
}

/// Read the `BROWSER_KILL_ORPHANED` environment variable the way the Python
/// original's env-var escape hatch works: any of `1`, `true`, `yes`
/// (case-insensitive) enables it, anything else (including unset) leaves the
/// default of `false` — mirrored here rather than in Process Reclamation
/// itself, since only the Fleet Manager knows whether a call already carries
/// an explicit per-call override.
fn kill_orphaned_default() -> bool {
    std::env::var("BROWSER_KILL_ORPHANED")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Top-level façade wiring (A)-(D), (F), (G), (H) together. One Fleet
/// Manager per process is the expected deployment shape; nothing here is a
/// module-level singleton (§9).
pub struct FleetManager {
    config: AppConfig,
    profiles: Arc<ProfileRegistry>,
    reclaimer: Arc<ProcessReclaimer>,
    pool: Option<Arc<Pool>>,
    standalone_launcher: Arc<dyn InstanceLauncher>,
    validator: ScriptValidator,
    sessions: SessionStore,
    standalone: SyncMutex<HashMap<Uuid, Handle>>,
    current: SyncMutex<HashMap<String, Uuid>>,
}

impl FleetManager {
    /// Build a Fleet Manager with a live Worker Pool pre-warmed to
    /// `config.pool.min`. Use [`FleetManager::without_pool`] for an
    /// embedder that only ever wants standalone instances.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let profiles = Arc::new(ProfileRegistry::new(config.storage.profiles_dir.clone()));
        let reclaimer = Arc::new(ProcessReclaimer::new());
        let launcher: Arc<dyn InstanceLauncher> =
            Arc::new(RealInstanceLauncher::new(profiles.clone(), reclaimer.clone(), config.browser.clone()));
        let pool = Pool::new(config.pool.clone(), launcher.clone()).await?;
        let validator = ScriptValidator::load()?;
        let sessions = SessionStore::new(config.storage.sessions_dir.clone());

        Ok(Self {
            config,
            profiles,
            reclaimer,
            pool: Some(pool),
            standalone_launcher: launcher,
            validator,
            sessions,
            standalone: SyncMutex::new(HashMap::new()),
            current: SyncMutex::new(HashMap::new()),
        })
    }

    /// Build a Fleet Manager with no pool: every acquisition is standalone.
    pub fn without_pool(config: AppConfig) -> Self {
        let profiles = Arc::new(ProfileRegistry::new(config.storage.profiles_dir.clone()));
        let reclaimer = Arc::new(ProcessReclaimer::new());
        let launcher: Arc<dyn InstanceLauncher> =
            Arc::new(RealInstanceLauncher::new(profiles.clone(), reclaimer.clone(), config.browser.clone()));
        let validator = ScriptValidator::load().expect("bundled script validator patterns must parse");
        let sessions = SessionStore::new(config.storage.sessions_dir.clone());

        Self {
            config,
            profiles,
            reclaimer,
            pool: None,
            standalone_launcher: launcher,
            validator,
            sessions,
            standalone: SyncMutex::new(HashMap::new()),
            current: SyncMutex::new(HashMap::new()),
        }
    }

    /// Test/embedder constructor that injects an already-built launcher and
    /// optional pool, bypassing real Chrome discovery entirely.
    #[doc(hidden)]
    pub fn from_parts(config: AppConfig, launcher: Arc<dyn InstanceLauncher>, pool: Option<Arc<Pool>>) -> Self {
        let profiles = Arc::new(ProfileRegistry::new(config.storage.profiles_dir.clone()));
        let reclaimer = Arc::new(ProcessReclaimer::new());
        let validator = ScriptValidator::load().expect("bundled script validator patterns must parse");
        let sessions = SessionStore::new(config.storage.sessions_dir.clone());
        Self {
            config,
            profiles,
            reclaimer,
            pool,
            standalone_launcher: launcher,
            validator,
            sessions,
            standalone: SyncMutex::new(HashMap::new()),
            current: SyncMutex::new(HashMap::new()),
        }
    }

    fn resolve_kill_orphaned(&self, requested: Option<bool>) -> bool {
        requested.unwrap_or_else(kill_orphaned_default)
    }

    /// Acquire a browser: pool-mode delegates to the Worker Pool, standalone
    /// spawns a fresh Instance tracked outside it.
    pub async fn get_or_create(&self, options: GetOrCreateOptions) -> Result<Arc<Instance>> {
        let kill_orphaned = self.resolve_kill_orphaned(options.kill_orphaned);

        if options.use_pool {
            if let Some(pool) = &self.pool {
                let launch_options = options.launch_options();
                let worker = pool.acquire(&launch_options, kill_orphaned, options.acquire_deadline).await?;
                let instance = worker.instance.clone();
                let id = instance.id;
                self.standalone.lock().insert(id, Handle::Pooled(worker));
                return Ok(instance);
            }
        }

        let launch_options = options.launch_options();
        let instance = Arc::new(self.standalone_launcher.launch(&launch_options, kill_orphaned).await?);
        let id = instance.id;
        self.standalone.lock().insert(id, Handle::Standalone(instance.clone()));
        Ok(instance)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Instance>> {
        self.standalone.lock().get(&id).map(|h| h.instance().clone())
    }

    pub fn list(&self) -> Vec<InstanceInfo> {
        self.standalone.lock().values().map(|h| h.instance().info()).collect()
    }

    /// Terminate `id`. `return_to_pool` only matters for a pool-mode handle:
    /// when true, release it back to the pool instead of quitting it
    /// outright. Standalone instances are always quit.
    pub async fn terminate(&self, id: Uuid, return_to_pool: bool) -> Result<bool> {
        let handle = self.standalone.lock().remove(&id);
        match handle {
            Some(Handle::Pooled(worker)) => {
                if return_to_pool {
                    if let Some(pool) = &self.pool {
                        pool.release(worker.worker_id)?;
                    }
                } else {
                    worker.instance.quit().await?;
                }
                self.forget_if_current(id);
                Ok(true)
            }
            Some(Handle::Standalone(instance)) => {
                instance.quit().await?;
                self.forget_if_current(id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn forget_if_current(&self, id: Uuid) {
        self.current.lock().retain(|_, v| *v != id);
    }

    /// Run `script` through the Script Validator before dispatch — the core
    /// never calls `execute_script` without this gate (§4.8).
    pub async fn execute_script(&self, id: Uuid, script: &str) -> Result<Value> {
        self.validator.validate_or_reject(script)?;
        let instance = self.get(id).ok_or_else(|| FleetError::InstanceNotFound(id.to_string()))?;
        instance.execute_script(script).await
    }

    pub async fn save_session(&self, instance_id: Uuid, name: Option<String>) -> Result<Uuid> {
        let instance = self.get(instance_id).ok_or_else(|| FleetError::InstanceNotFound(instance_id.to_string()))?;
        self.sessions.save(&instance, name).await
    }

    /// Restore a saved session into a newly acquired instance. `headless`
    /// and `profile_override` default to the snapshot's own profile and the
    /// manager's default headless posture when not given.
    pub async fn restore_session(
        &self,
        session_id: Uuid,
        profile_override: Option<String>,
        headless: Option<bool>,
        kill_orphaned: Option<bool>,
    ) -> Result<(Arc<Instance>, RestoreReport)> {
        let snapshot = self.sessions.get(session_id)?;
        let profile = profile_override.or_else(|| snapshot.profile.clone());

        let options = GetOrCreateOptions {
            headless: headless.unwrap_or(true),
            profile,
            anti_detect: self.config.pool.anti_detect_default,
            use_pool: false,
            security_level: self.config.security.level,
            download_dir: None,
            kill_orphaned,
            acquire_deadline: Duration::from_secs(30),
        };
        let instance = self.get_or_create(options).await?;
        let report = self.sessions.restore(session_id, &instance).await?;
        Ok((instance, report))
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.sessions.list()
    }

    pub fn delete_session(&self, session_id: Uuid) -> Result<bool> {
        self.sessions.delete(session_id)
    }

    pub fn create_profile(&self, name: &str, description: &str) -> Result<PathBuf> {
        self.profiles.create(name, description)
    }

    pub fn delete_profile(&self, name: &str) -> Result<bool> {
        self.profiles.delete(name)
    }

    pub fn list_profiles(&self) -> Result<Vec<ProfileRecord>> {
        self.profiles.list()
    }

    /// Orphan reclamation exposed directly, for callers that want to sweep a
    /// profile without going through a launch.
    pub fn kill_orphans_for_profile(&self, name: &str) -> Result<u32> {
        let dir = self.profiles.get_dir(name)?;
        self.reclaimer.kill_orphans_for(&dir)
    }

    pub fn current_instance(&self, client: &str) -> Option<Uuid> {
        self.current.lock().get(client).copied()
    }

    pub fn set_current(&self, client: &str, id: Uuid) {
        self.current.lock().insert(client.to_string(), id);
    }

    /// Resolve an optional explicit instance id against the sticky
    /// "current instance" for `client`, defaulting `client` to `""` for
    /// embedders with no transport layer of their own.
    pub fn resolve_instance(&self, client: &str, explicit: Option<Uuid>) -> Result<Arc<Instance>> {
        let id = explicit.or_else(|| self.current_instance(client)).ok_or_else(|| FleetError::InstanceNotFound("no current instance".to_string()))?;
        self.get(id).ok_or_else(|| FleetError::InstanceNotFound(id.to_string()))
    }

    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
        let handles: Vec<Handle> = self.standalone.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Handle::Standalone(instance) = handle {
                let _ = instance.quit().await;
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BrowserConfig;
    use crate::driver::fake::FakeInstanceLauncher;
    use tempfile::tempdir;

    fn test_config(root: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.profiles_dir = root.join("profiles");
        config.storage.sessions_dir = root.join("sessions");
        config.storage.downloads_dir = root.join("downloads");
        config.pool.min = 0;
        config.pool.max = 4;
        config.pool.warm = 0;
        config
    }

    fn fake_launcher(config: &AppConfig) -> Arc<dyn InstanceLauncher> {
        Arc::new(FakeInstanceLauncher {
            profiles: Arc::new(ProfileRegistry::new(config.storage.profiles_dir.clone())),
            reclaimer: Arc::new(ProcessReclaimer::new()),
            browser_config: BrowserConfig::default(),
        })
    }

    #[tokio::test]
    async fn test_standalone_get_or_create_and_terminate() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let launcher = fake_launcher(&config);
        let manager = FleetManager::from_parts(config, launcher, None);

        let instance = manager.get_or_create(GetOrCreateOptions { use_pool: false, ..Default::default() }).await.unwrap();
        let id = instance.id;
        assert!(manager.get(id).is_some());
        assert_eq!(manager.list().len(), 1);

        assert!(manager.terminate(id, false).await.unwrap());
        assert!(manager.get(id).is_none());
        assert!(!manager.terminate(id, false).await.unwrap());
    }

    #[tokio::test]
    async fn test_pool_mode_acquire_and_return_to_pool() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let launcher = fake_launcher(&config);
        let pool = Pool::new(config.pool.clone(), launcher.clone()).await.unwrap();
        let manager = FleetManager::from_parts(config, launcher, Some(pool.clone()));

        let instance = manager.get_or_create(GetOrCreateOptions::default()).await.unwrap();
        let id = instance.id;
        assert!(manager.terminate(id, true).await.unwrap());
        // The worker is back in the pool, not quit.
        assert_eq!(pool.list().len(), 1);
    }

    #[tokio::test]
    async fn test_sticky_current_instance_per_client() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let launcher = fake_launcher(&config);
        let manager = FleetManager::from_parts(config, launcher, None);

        let instance = manager.get_or_create(GetOrCreateOptions { use_pool: false, ..Default::default() }).await.unwrap();
        manager.set_current("", instance.id);
        assert_eq!(manager.current_instance(""), Some(instance.id));
        assert_eq!(manager.resolve_instance("", None).unwrap().id, instance.id);
        assert!(manager.current_instance("other-client").is_none());
    }

    #[tokio::test]
    async fn test_terminate_clears_current_instance() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let launcher = fake_launcher(&config);
        let manager = FleetManager::from_parts(config, launcher, None);

        let instance = manager.get_or_create(GetOrCreateOptions { use_pool: false, ..Default::default() }).await.unwrap();
        manager.set_current("", instance.id);
        manager.terminate(instance.id, false).await.unwrap();
        assert!(manager.current_instance("").is_none());
    }

    #[tokio::test]
    async fn test_execute_script_rejects_forbidden_pattern() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let launcher = fake_launcher(&config);
        let manager = FleetManager::from_parts(config, launcher, None);

        let instance = manager.get_or_create(GetOrCreateOptions { use_pool: false, ..Default::default() }).await.unwrap();
        let result = manager.execute_script(instance.id, "document.cookie").await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), "ScriptForbidden");
    }

    #[tokio::test]
    async fn test_save_and_restore_session_round_trip() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let launcher = fake_launcher(&config);
        let manager = FleetManager::from_parts(config, launcher, None);

        let instance = manager.get_or_create(GetOrCreateOptions { use_pool: false, ..Default::default() }).await.unwrap();
        instance.navigate("https://example.com/").await.unwrap();
        let session_id = manager.save_session(instance.id, Some("mine".into())).await.unwrap();

        assert_eq!(manager.list_sessions().unwrap().len(), 1);

        let (restored, report) = manager.restore_session(session_id, None, Some(true), None).await.unwrap();
        assert_eq!(restored.current_url().await.unwrap(), "https://example.com/");
        assert_eq!(report.cookies.failed, 0);

        assert!(manager.delete_session(session_id).unwrap());
        assert!(manager.list_sessions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_list_delete_profile() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let launcher = fake_launcher(&config);
        let manager = FleetManager::from_parts(config, launcher, None);

        manager.create_profile("work", "work profile").unwrap();
        let profiles = manager.list_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "work");

        assert!(manager.delete_profile("work").unwrap());
        assert!(manager.list_profiles().unwrap().is_empty());
    }

    #[test]
    fn test_kill_orphaned_default_reads_env_var() {
        std::env::remove_var("BROWSER_KILL_ORPHANED");
        assert!(!kill_orphaned_default());
        std::env::set_var("BROWSER_KILL_ORPHANED", "true");
        assert!(kill_orphaned_default());
        std::env::set_var("BROWSER_KILL_ORPHANED", "0");
        assert!(!kill_orphaned_default());
        std::env::remove_var("BROWSER_KILL_ORPHANED");
    }
}
