//! Launch Options Builder (component B): decides the user-data directory for
//! a launch and produces the argument/preference bundle to spawn Chrome with.

pub mod port;
pub mod security;

use crate::config::schema::{BrowserConfig, SecurityLevel};
use crate::error::Result;
use crate::profile::{dir_is_nonempty, ProfileRegistry};
use crate::reclaim::ProcessReclaimer;
use port::PortAllocator;
use serde_json::Value;
use std::path::PathBuf;

/// Options a caller supplies when requesting a new browser instance.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub headless: bool,
    pub profile: Option<String>,
    pub extra_args: Vec<String>,
    pub anti_detect: bool,
    pub security_level: SecurityLevel,
    pub download_dir: Option<PathBuf>,
}

/// A transient value produced immediately before a child-process spawn;
/// never persisted.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub headless: bool,
    pub profile: Option<String>,
    pub anti_detect: bool,
    pub security_level: SecurityLevel,
    pub user_data_dir: PathBuf,
    /// Set when the user-data dir is a temp copy that should be deleted on
    /// termination (always true in this design — see §4.2 rule 2).
    pub is_temp_dir: bool,
    pub debug_port: u16,
    pub chrome_args: Vec<String>,
    pub prefs: Value,
    pub anti_detect_startup_script: Option<String>,
}

impl LaunchPlan {
    /// Guaranteed-cleanup hook: release the port and remove the temp
    /// user-data directory this plan reserved. Self-contained — unlike
    /// building a plan, releasing one needs neither the profile registry nor
    /// the reclaimer, so an `Instance` can call this directly at `quit` time
    /// without holding a borrowed `LaunchOptionsBuilder`.
    pub fn release(&self) {
        if self.is_temp_dir && self.user_data_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
                tracing::warn!("failed to remove temp user-data-dir {:?}: {}", self.user_data_dir, e);
            }
        }
        PortAllocator::release(self.debug_port);
    }
}

/// Builds `LaunchPlan`s and releases the resources (temp dir, port) a plan reserved.
pub struct LaunchOptionsBuilder<'a> {
    profiles: &'a ProfileRegistry,
    reclaimer: &'a ProcessReclaimer,
    browser: BrowserConfig,
}

impl<'a> LaunchOptionsBuilder<'a> {
    pub fn new(profiles: &'a ProfileRegistry, reclaimer: &'a ProcessReclaimer, browser: BrowserConfig) -> Self {
        Self { profiles, reclaimer, browser }
    }

    pub fn build(&self, options: &LaunchOptions) -> Result<LaunchPlan> {
        let debug_port = PortAllocator::allocate()?;

        let user_data_dir = match &options.profile {
            Some(name) => {
                let src_dir = self.profiles.get_dir(name)?;
                // Rule 3: remove genuinely stale (dead-process) lockfiles from
                // the source profile directory before deciding whether to copy it.
                self.reclaimer.remove_stale_lockfiles(&src_dir)?;

                let dest = unique_temp_dir(&format!("chrome_profile_{}_", sanitize(name)));
                if dir_is_nonempty(&src_dir) {
                    copy_profile_tree(&src_dir, &dest)?;
                } else {
                    std::fs::create_dir_all(&dest)?;
                }
                dest
            }
            None => unique_temp_dir("chrome_temp_"),
        };

        let mut chrome_args = canonical_flags(options.headless);
        if options.anti_detect {
            chrome_args.extend(anti_detect_flags());
        }

        let preset = security::preset_for(options.security_level);
        chrome_args.extend(preset.args.clone());
        chrome_args.extend(options.extra_args.clone());

        let anti_detect_startup_script = if options.anti_detect { Some(ANTI_DETECT_STARTUP_SCRIPT.to_string()) } else { None };

        Ok(LaunchPlan {
            headless: options.headless,
            profile: options.profile.clone(),
            anti_detect: options.anti_detect,
            security_level: options.security_level,
            user_data_dir,
            is_temp_dir: true,
            debug_port,
            chrome_args,
            prefs: preset.prefs,
            anti_detect_startup_script,
        })
    }

    /// Guaranteed-cleanup hook: release the port and remove the temp
    /// user-data directory for a plan whose instance has terminated.
    pub fn release(&self, plan: &LaunchPlan) {
        plan.release();
    }

    pub fn browser_config(&self) -> &BrowserConfig {
        &self.browser
    }
}

const ANTI_DETECT_STARTUP_SCRIPT: &str = "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

fn canonical_flags(headless: bool) -> Vec<String> {
    let mut args = vec![
        "--disable-infobars".into(),
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        "--disable-background-networking".into(),
        "--disable-background-timer-throttling".into(),
        "--disable-backgrounding-occluded-windows".into(),
        "--disable-renderer-backgrounding".into(),
        "--disable-sync".into(),
        "--metrics-recording-only".into(),
        "--disable-default-apps".into(),
        "--disable-prompt-on-repost".into(),
        "--disable-client-side-phishing-detection".into(),
        "--disable-component-update".into(),
    ];
    if headless {
        args.push("--headless=new".into());
        args.push("--disable-gpu".into());
    }
    args
}

fn anti_detect_flags() -> Vec<String> {
    vec!["--disable-blink-features=AutomationControlled".into(), "--exclude-switches=enable-automation".into()]
}

fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

fn random_suffix() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..8).map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap()).collect()
}

fn unique_temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}{}", prefix, random_suffix()))
}

fn copy_profile_tree(src: &std::path::Path, dst: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        for entry in std::fs::read_dir(&from)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let src_path = entry.path();
            let name = entry.file_name();
            // Never copy the singleton lock family into the fresh working copy.
            if matches!(name.to_str(), Some("SingletonLock") | Some("SingletonSocket") | Some("SingletonCookie")) {
                continue;
            }
            let dst_path = to.join(&name);
            if file_type.is_dir() {
                std::fs::create_dir_all(&dst_path)?;
                stack.push((src_path, dst_path));
            } else if file_type.is_file() {
                std::fs::copy(&src_path, &dst_path)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reclaim::ProcessReclaimer;
    use tempfile::tempdir;

    fn builder(root: &std::path::Path) -> (ProfileRegistry, ProcessReclaimer) {
        (ProfileRegistry::new(root.to_path_buf()), ProcessReclaimer::new())
    }

    #[test]
    fn test_build_without_profile_creates_fresh_temp_dir() {
        let root = tempdir().unwrap();
        let (profiles, reclaimer) = builder(root.path());
        let b = LaunchOptionsBuilder::new(&profiles, &reclaimer, BrowserConfig::default());
        let plan = b.build(&LaunchOptions::default()).unwrap();
        assert!(plan.user_data_dir.exists());
        assert!(plan.user_data_dir.to_string_lossy().contains("chrome_temp_"));
        b.release(&plan);
        assert!(!plan.user_data_dir.exists());
    }

    #[test]
    fn test_build_with_nonempty_profile_copies_tree() {
        let root = tempdir().unwrap();
        let (profiles, reclaimer) = builder(root.path());
        let src = profiles.create("work", "").unwrap();
        std::fs::write(src.join("Preferences"), b"{}").unwrap();

        let b = LaunchOptionsBuilder::new(&profiles, &reclaimer, BrowserConfig::default());
        let opts = LaunchOptions { profile: Some("work".into()), ..Default::default() };
        let plan = b.build(&opts).unwrap();

        assert_ne!(plan.user_data_dir, src);
        assert!(plan.user_data_dir.join("Preferences").exists());
        b.release(&plan);
    }

    #[test]
    fn test_two_concurrent_builds_for_same_profile_get_distinct_dirs() {
        let root = tempdir().unwrap();
        let (profiles, reclaimer) = builder(root.path());
        profiles.create("work", "").unwrap();
        let b = LaunchOptionsBuilder::new(&profiles, &reclaimer, BrowserConfig::default());
        let opts = LaunchOptions { profile: Some("work".into()), ..Default::default() };
        let plan_a = b.build(&opts).unwrap();
        let plan_b = b.build(&opts).unwrap();
        assert_ne!(plan_a.user_data_dir, plan_b.user_data_dir);
        assert_ne!(plan_a.debug_port, plan_b.debug_port);
        b.release(&plan_a);
        b.release(&plan_b);
    }

    #[test]
    fn test_anti_detect_adds_disjoint_flags_and_startup_script() {
        let root = tempdir().unwrap();
        let (profiles, reclaimer) = builder(root.path());
        let b = LaunchOptionsBuilder::new(&profiles, &reclaimer, BrowserConfig::default());
        let opts = LaunchOptions { anti_detect: true, ..Default::default() };
        let plan = b.build(&opts).unwrap();
        assert!(plan.anti_detect_startup_script.is_some());
        assert!(plan.chrome_args.iter().any(|a| a.contains("exclude-switches")));
        b.release(&plan);
    }

    #[test]
    fn test_permissive_security_level_adds_insecure_content_flags() {
        let root = tempdir().unwrap();
        let (profiles, reclaimer) = builder(root.path());
        let b = LaunchOptionsBuilder::new(&profiles, &reclaimer, BrowserConfig::default());
        let opts = LaunchOptions { security_level: crate::config::schema::SecurityLevel::Permissive, ..Default::default() };
        let plan = b.build(&opts).unwrap();
        assert!(plan.chrome_args.iter().any(|a| a == "--disable-web-security"));
        b.release(&plan);
    }
}
