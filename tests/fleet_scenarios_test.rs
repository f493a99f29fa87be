//! End-to-end scenarios against an in-memory `Driver`, exercising the Fleet
//! Manager, Worker Pool, Profile Registry, Session Store, and Process
//! Reclamation together the way a real caller would — no Chrome binary
//! required.

use async_trait::async_trait;
use fleetbrowse::config::schema::{AppConfig, BrowserConfig};
use fleetbrowse::driver::fake::FakeDriver;
use fleetbrowse::fleet::{FleetManager, GetOrCreateOptions};
use fleetbrowse::instance::{Instance, InstanceLauncher};
use fleetbrowse::launch::{LaunchOptions, LaunchOptionsBuilder};
use fleetbrowse::profile::ProfileRegistry;
use fleetbrowse::reclaim::ProcessReclaimer;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

/// Mirrors the crate's own test-only `FakeInstanceLauncher`: builds a real
/// `LaunchPlan` (so profile-copy, port allocation, and orphan checks all run
/// exactly as production would) but wraps a `FakeDriver` instead of spawning
/// Chrome. Integration tests live in a separate compilation unit, so the
/// crate's `#[cfg(test)]`-gated helper of the same shape isn't visible here.
struct TestLauncher {
    profiles: Arc<ProfileRegistry>,
    reclaimer: Arc<ProcessReclaimer>,
    browser_config: BrowserConfig,
}

#[async_trait]
impl InstanceLauncher for TestLauncher {
    async fn launch(&self, options: &LaunchOptions, kill_orphaned: bool) -> fleetbrowse::Result<Instance> {
        let builder = LaunchOptionsBuilder::new(&self.profiles, &self.reclaimer, self.browser_config.clone());
        let plan = builder.build(options)?;
        if let Some(name) = &plan.profile {
            if let Err(e) = self.profiles.get_dir(name).and_then(|dir| self.reclaimer.ensure_available(name, &dir, kill_orphaned)) {
                builder.release(&plan);
                return Err(e);
            }
        }
        Ok(Instance::from_driver(Arc::new(FakeDriver::new()), plan, self.browser_config.clone()))
    }
}

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

fn launcher(config: &AppConfig) -> Arc<dyn InstanceLauncher> {
    Arc::new(TestLauncher {
        profiles: Arc::new(ProfileRegistry::new(config.storage.profiles_dir.clone())),
        reclaimer: Arc::new(ProcessReclaimer::new()),
        browser_config: BrowserConfig::default(),
    })
}

#[tokio::test]
async fn s1_tab_persistence_survives_terminate_and_restore() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let manager = FleetManager::from_parts(config, launcher(&config), None);

    let instance = manager.get_or_create(GetOrCreateOptions { use_pool: false, ..Default::default() }).await.unwrap();
    instance.navigate("https://example.com/x").await.unwrap();
    instance.open_new_window("https://example.com/reddit").await.unwrap();
    let session_id = manager.save_session(instance.id, Some("s1".into())).await.unwrap();
    manager.terminate(instance.id, false).await.unwrap();

    let (restored, _report) = manager.restore_session(session_id, None, Some(true), None).await.unwrap();
    let handles = restored.window_handles().await.unwrap();
    assert_eq!(handles.len(), 2);
    let urls: std::collections::HashSet<String> = handles.iter().map(|h| h.url.clone()).collect();
    assert!(urls.contains("https://example.com/x"));
    assert!(urls.contains("https://example.com/reddit"));
}

#[tokio::test]
async fn s4_profile_collision_gives_distinct_user_data_dirs() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.pool.max = 2;
    let l = launcher(&config);
    let pool = fleetbrowse::pool::Pool::new(config.pool.clone(), l.clone()).await.unwrap();
    let manager = FleetManager::from_parts(config, l, Some(pool));

    let a = manager
        .get_or_create(GetOrCreateOptions { profile: Some("shared".into()), use_pool: true, ..Default::default() })
        .await
        .unwrap();
    let b = manager
        .get_or_create(GetOrCreateOptions { profile: Some("shared".into()), use_pool: true, ..Default::default() })
        .await
        .unwrap();

    assert_ne!(a.user_data_dir, b.user_data_dir);
    assert_eq!(a.profile_name.as_deref(), Some("shared"));
    assert_eq!(b.profile_name.as_deref(), Some("shared"));
}

#[cfg(unix)]
#[tokio::test]
async fn s5_launch_fails_on_live_orphan_naming_kill_orphaned_flag() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let manager = FleetManager::from_parts(config.clone(), launcher(&config), None);

    manager.create_profile("leaked", "").unwrap();
    let profile_dir = ProfileRegistry::new(config.storage.profiles_dir.clone()).get_dir("leaked").unwrap();

    // Leak: pretend a still-running process (this test process itself) holds
    // the profile's singleton lock, as an ungracefully-killed prior launch
    // would leave behind.
    let my_pid = std::process::id();
    std::os::unix::fs::symlink(format!("myhost-{}", my_pid), profile_dir.join("SingletonLock")).unwrap();

    let err = manager
        .get_or_create(GetOrCreateOptions { use_pool: false, profile: Some("leaked".into()), ..Default::default() })
        .await
        .unwrap_err();

    assert_eq!(err.code(), "ProfileLocked");
    assert!(err.to_string().contains("kill_orphaned"));
    std::fs::remove_file(profile_dir.join("SingletonLock")).unwrap();
}

#[tokio::test]
async fn s7_pool_fifo_hands_released_worker_to_earliest_waiter() {
    let dir = tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.pool.max = 1;
    let l = launcher(&config);
    let pool = fleetbrowse::pool::Pool::new(config.pool.clone(), l.clone()).await.unwrap();

    let opts = LaunchOptions { headless: true, ..Default::default() };
    let worker_a = pool.acquire(&opts, false, Duration::from_secs(5)).await.unwrap();

    let pool_clone = pool.clone();
    let waiter_b = tokio::spawn(async move { pool_clone.acquire(&opts, false, Duration::from_secs(5)).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.release(worker_a.worker_id).unwrap();

    let worker_b = waiter_b.await.unwrap().unwrap();
    assert_eq!(worker_b.worker_id, worker_a.worker_id);
}

#[tokio::test]
async fn invariant_shutdown_leaves_no_tracked_instances() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let manager = FleetManager::from_parts(config, launcher(&config), None);

    manager.get_or_create(GetOrCreateOptions { use_pool: false, ..Default::default() }).await.unwrap();
    manager.get_or_create(GetOrCreateOptions { use_pool: false, ..Default::default() }).await.unwrap();
    assert_eq!(manager.list().len(), 2);

    manager.shutdown().await;
    assert_eq!(manager.list().len(), 0);
}
