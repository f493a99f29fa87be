//! Browser Instance (component C): the state machine around one launched
//! browser process and its `Driver` handle.

use crate::config::schema::BrowserConfig;
use crate::driver::{Cookie, Driver, WindowHandle};
use crate::error::{FleetError, Result};
use crate::launch::{LaunchOptions, LaunchOptionsBuilder, LaunchPlan};
use crate::profile::ProfileRegistry;
use crate::reclaim::ProcessReclaimer;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// The known-transient substrings the launch retry loop matches against a
/// failed connect attempt's error message (case-insensitive).
const TRANSIENT_LAUNCH_ERRORS: &[&str] =
    &["unable to connect to renderer", "chrome not reachable", "session not created", "chrome failed to start", "timeout"];

const MAX_LAUNCH_ATTEMPTS: u32 = 3;
const LAUNCH_BACKOFF_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Starting,
    Ready,
    Busy,
    Hibernating,
    Closing,
    Closed,
    Error,
}

/// One launched browser and everything needed to quit it cleanly.
pub struct Instance {
    pub id: Uuid,
    status: SyncMutex<Status>,
    driver: Arc<dyn Driver>,
    /// Serializes every call into `driver` — the underlying transport is not
    /// safe for concurrent use (§5).
    call_lock: AsyncMutex<()>,
    pub profile_name: Option<String>,
    pub user_data_dir: PathBuf,
    pub debug_port: u16,
    pub created_at: Instant,
    last_activity: SyncMutex<Instant>,
    plan: LaunchPlan,
    browser_config: BrowserConfig,
    child: SyncMutex<Option<std::process::Child>>,
    quit_started: SyncMutex<bool>,
}

/// Non-owning summary for listing, matching `InstanceInfo` in the external
/// interface table.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub id: Uuid,
    pub status: Status,
    pub profile_name: Option<String>,
    pub user_data_dir: PathBuf,
    pub debug_port: u16,
    pub created_at_unix: u64,
}

impl Instance {
    /// Real launch: build a plan, guard against a live orphan holding the
    /// named profile, spawn Chrome with retry, connect a `CdpDriver`, install
    /// the anti-detect startup script if requested, transition to `Ready`.
    pub async fn launch(
        options: &LaunchOptions,
        profiles: &ProfileRegistry,
        reclaimer: &ProcessReclaimer,
        browser_config: BrowserConfig,
        kill_orphaned: bool,
    ) -> Result<Self> {
        let builder = LaunchOptionsBuilder::new(profiles, reclaimer, browser_config.clone());
        let plan = builder.build(options)?;

        if let Some(name) = &plan.profile {
            if let Err(e) = profiles.get_dir(name).and_then(|dir| reclaimer.ensure_available(name, &dir, kill_orphaned)) {
                builder.release(&plan);
                return Err(e);
            }
        }

        match Self::spawn_with_retry(&plan, &browser_config).await {
            Ok((driver, child)) => {
                let instance = Self {
                    id: Uuid::new_v4(),
                    status: SyncMutex::new(Status::Starting),
                    driver,
                    call_lock: AsyncMutex::new(()),
                    profile_name: plan.profile.clone(),
                    user_data_dir: plan.user_data_dir.clone(),
                    debug_port: plan.debug_port,
                    created_at: Instant::now(),
                    last_activity: SyncMutex::new(Instant::now()),
                    plan: plan.clone(),
                    browser_config,
                    child: SyncMutex::new(child),
                    quit_started: SyncMutex::new(false),
                };

                if let Some(script) = &instance.plan.anti_detect_startup_script {
                    instance.driver.add_startup_script(script).await?;
                }

                *instance.status.lock() = Status::Ready;
                Ok(instance)
            }
            Err(e) => {
                builder.release(&plan);
                Err(e)
            }
        }
    }

    /// Wrap an already-connected driver without spawning a process — the
    /// path every pool/fleet/session test uses with `FakeDriver`.
    pub fn from_driver(driver: Arc<dyn Driver>, plan: LaunchPlan, browser_config: BrowserConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: SyncMutex::new(Status::Ready),
            driver,
            call_lock: AsyncMutex::new(()),
            profile_name: plan.profile.clone(),
            user_data_dir: plan.user_data_dir.clone(),
            debug_port: plan.debug_port,
            created_at: Instant::now(),
            last_activity: SyncMutex::new(Instant::now()),
            plan,
            browser_config,
            child: SyncMutex::new(None),
            quit_started: SyncMutex::new(false),
        }
    }

    async fn spawn_with_retry(plan: &LaunchPlan, browser_config: &BrowserConfig) -> Result<(Arc<dyn Driver>, Option<std::process::Child>)> {
        let chrome_path = browser_config.resolve_chrome_path();
        let mut attempt = 0u32;
        let mut delay = LAUNCH_BACKOFF_BASE;
        loop {
            attempt += 1;
            match Self::spawn_once(&chrome_path, plan).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let message = e.to_string().to_lowercase();
                    let transient = TRANSIENT_LAUNCH_ERRORS.iter().any(|needle| message.contains(needle));
                    if !transient || attempt >= MAX_LAUNCH_ATTEMPTS {
                        return Err(FleetError::LaunchFailed(e.to_string()));
                    }
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "transient launch failure, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn spawn_once(chrome_path: &std::path::Path, plan: &LaunchPlan) -> Result<(Arc<dyn Driver>, Option<std::process::Child>)> {
        let mut cmd = std::process::Command::new(chrome_path);
        cmd.arg(format!("--user-data-dir={}", plan.user_data_dir.display()));
        cmd.arg(format!("--remote-debugging-port={}", plan.debug_port));
        for arg in &plan.chrome_args {
            cmd.arg(arg);
        }
        cmd.arg("about:blank");

        let child = cmd.spawn().map_err(|e| FleetError::LaunchFailed(format!("chrome failed to start: {}", e)))?;
        let driver = crate::driver::cdp::CdpDriver::connect(plan.debug_port).await?;
        Ok((Arc::new(driver), Some(child)))
    }

    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    pub fn set_status(&self, status: Status) {
        *self.status.lock() = status;
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub fn plan(&self) -> &LaunchPlan {
        &self.plan
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.id,
            status: self.status(),
            profile_name: self.profile_name.clone(),
            user_data_dir: self.user_data_dir.clone(),
            debug_port: self.debug_port,
            created_at_unix: SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs(),
        }
    }

    async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Driver>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let _guard = self.call_lock.lock().await;
        self.touch();
        f(self.driver.clone()).await
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let timeout = Duration::from_secs(self.browser_config.page_load_timeout_s);
        self.call(|d| async move { tokio::time::timeout(timeout, d.navigate(url)).await.map_err(|_| FleetError::TimeoutError(timeout))? })
            .await
    }

    pub async fn current_url(&self) -> Result<String> {
        self.call(|d| async move { d.current_url().await }).await
    }

    pub async fn current_title(&self) -> Result<String> {
        self.call(|d| async move { d.current_title().await }).await
    }

    pub async fn window_handles(&self) -> Result<Vec<WindowHandle>> {
        self.call(|d| async move { d.window_handles().await }).await
    }

    pub async fn current_window_handle(&self) -> Result<String> {
        self.call(|d| async move { d.current_window_handle().await }).await
    }

    pub async fn switch_to_window(&self, handle: &str) -> Result<()> {
        self.call(|d| async move { d.switch_to_window(handle).await }).await
    }

    pub async fn open_new_window(&self, url: &str) -> Result<WindowHandle> {
        self.call(|d| async move { d.open_new_window(url).await }).await
    }

    pub async fn close_window(&self, handle: &str) -> Result<()> {
        self.call(|d| async move { d.close_window(handle).await }).await
    }

    pub async fn get_cookies(&self) -> Result<Vec<Cookie>> {
        self.call(|d| async move { d.get_cookies().await }).await
    }

    pub async fn add_cookie(&self, cookie: Cookie) -> Result<()> {
        self.call(|d| async move { d.add_cookie(&cookie).await }).await
    }

    pub async fn delete_all_cookies(&self) -> Result<()> {
        self.call(|d| async move { d.delete_all_cookies().await }).await
    }

    pub async fn execute_script(&self, script: &str) -> Result<Value> {
        self.call(|d| async move { d.execute_script(script).await }).await
    }

    pub async fn page_source(&self) -> Result<String> {
        self.call(|d| async move { d.page_source().await }).await
    }

    /// Health probe: read `current_url`. Any error flips the instance to
    /// `Error` and is reported as `HealthFailed`.
    pub async fn health_check(&self) -> Result<()> {
        match self.current_url().await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.set_status(Status::Error);
                Err(FleetError::HealthFailed(format!("{}: {}", self.id, e)))
            }
        }
    }

    /// Quit the driver, then unconditionally stop the process, then release
    /// the port and temp user-data-dir. Idempotent.
    pub async fn quit(&self) -> Result<()> {
        {
            let mut started = self.quit_started.lock();
            if *started {
                return Ok(());
            }
            *started = true;
        }
        self.set_status(Status::Closing);

        let _ = self.driver.quit().await;

        if let Some(mut child) = self.child.lock().take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        self.plan.release();
        self.set_status(Status::Closed);
        Ok(())
    }
}

/// Produces a launched `Instance` from `LaunchOptions`. The seam the Worker
/// Pool spawns through — in production, a real Chrome launch; in tests, a
/// `FakeDriver`-backed instance built from the same plan (so profile-copy and
/// port-allocation behavior are still exercised, just without a real browser).
#[async_trait::async_trait]
pub trait InstanceLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions, kill_orphaned: bool) -> Result<Instance>;
}

/// Production launcher: spawns a real Chrome process per [`Instance::launch`].
pub struct RealInstanceLauncher {
    profiles: Arc<ProfileRegistry>,
    reclaimer: Arc<ProcessReclaimer>,
    browser_config: BrowserConfig,
}

impl RealInstanceLauncher {
    pub fn new(profiles: Arc<ProfileRegistry>, reclaimer: Arc<ProcessReclaimer>, browser_config: BrowserConfig) -> Self {
        Self { profiles, reclaimer, browser_config }
    }
}

#[async_trait::async_trait]
impl InstanceLauncher for RealInstanceLauncher {
    async fn launch(&self, options: &LaunchOptions, kill_orphaned: bool) -> Result<Instance> {
        Instance::launch(options, &self.profiles, &self.reclaimer, self.browser_config.clone(), kill_orphaned).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::FakeDriver;

    fn test_plan() -> LaunchPlan {
        LaunchPlan {
            headless: true,
            profile: None,
            anti_detect: false,
            security_level: crate::config::schema::SecurityLevel::Standard,
            user_data_dir: std::env::temp_dir(),
            is_temp_dir: false,
            debug_port: 0,
            chrome_args: vec![],
            prefs: serde_json::json!({}),
            anti_detect_startup_script: None,
        }
    }

    #[tokio::test]
    async fn test_from_driver_starts_ready() {
        let instance = Instance::from_driver(Arc::new(FakeDriver::new()), test_plan(), BrowserConfig::default());
        assert_eq!(instance.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_navigate_and_current_url_round_trip() {
        let instance = Instance::from_driver(Arc::new(FakeDriver::new()), test_plan(), BrowserConfig::default());
        instance.navigate("https://example.com").await.unwrap();
        assert_eq!(instance.current_url().await.unwrap(), "https://example.com");
    }

    #[tokio::test]
    async fn test_health_check_ok_keeps_instance_ready() {
        let instance = Instance::from_driver(Arc::new(FakeDriver::new()), test_plan(), BrowserConfig::default());
        instance.health_check().await.unwrap();
        assert_eq!(instance.status(), Status::Ready);
    }

    #[tokio::test]
    async fn test_touch_updates_idle_duration() {
        let instance = Instance::from_driver(Arc::new(FakeDriver::new()), test_plan(), BrowserConfig::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        instance.touch();
        assert!(instance.idle_for() < Duration::from_millis(10));
    }
}
