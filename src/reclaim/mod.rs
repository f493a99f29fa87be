//! Process Reclamation (component G): detects orphaned child processes that
//! still hold a profile's Chromium singleton lock, and kills them on demand.

use crate::error::{FleetError, Result};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;
use sysinfo::{Pid, System};

const GRACE_PERIOD: Duration = Duration::from_millis(500);
const LOCK_FILES: [&str; 3] = ["SingletonLock", "SingletonSocket", "SingletonCookie"];

pub struct ProcessReclaimer {
    system: Mutex<System>,
}

impl Default for ProcessReclaimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessReclaimer {
    pub fn new() -> Self {
        Self { system: Mutex::new(System::new()) }
    }

    /// Parse the PID encoded in `profile_dir/SingletonLock`'s symlink target
    /// (`<hostname>-<pid>`). Returns `None` if no lock file exists or it
    /// cannot be parsed.
    pub fn owning_pid(profile_dir: &Path) -> Option<u32> {
        let lock = profile_dir.join("SingletonLock");
        let target = std::fs::read_link(&lock).ok()?;
        let target = target.to_str()?;
        let (_, pid_str) = target.rsplit_once('-')?;
        pid_str.parse().ok()
    }

    /// Whether `pid` currently identifies a live process.
    pub fn is_pid_alive(&self, pid: u32) -> bool {
        let mut system = self.system.lock();
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        system.process(Pid::from_u32(pid)).is_some()
    }

    /// Check whether `profile_dir` has a live singleton-lock holder. Returns
    /// the owning PID if so.
    pub fn check_live_lock(&self, profile_dir: &Path) -> Option<u32> {
        let pid = Self::owning_pid(profile_dir)?;
        if self.is_pid_alive(pid) {
            Some(pid)
        } else {
            None
        }
    }

    /// Remove genuinely stale (dead-process) lockfiles from `profile_dir`.
    /// Never touches a live lock.
    pub fn remove_stale_lockfiles(&self, profile_dir: &Path) -> Result<()> {
        if let Some(pid) = Self::owning_pid(profile_dir) {
            if self.is_pid_alive(pid) {
                return Ok(());
            }
        }
        self.remove_lock_files(profile_dir)
    }

    fn remove_lock_files(&self, profile_dir: &Path) -> Result<()> {
        for name in LOCK_FILES {
            let path = profile_dir.join(name);
            if path.exists() || path.symlink_metadata().is_ok() {
                std::fs::remove_file(&path).or_else(|e| if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) })?;
            }
        }
        Ok(())
    }

    /// Kill whatever process is holding `profile_dir`'s singleton lock.
    /// Returns the number of processes killed (0 or 1 — a profile directory
    /// has at most one live holder by construction).
    pub fn kill_orphans_for(&self, profile_dir: &Path) -> Result<u32> {
        let pid = match Self::owning_pid(profile_dir) {
            Some(pid) => pid,
            None => return Ok(0),
        };
        if !self.is_pid_alive(pid) {
            self.remove_lock_files(profile_dir)?;
            return Ok(0);
        }

        self.terminate_pid(pid, false);
        std::thread::sleep(GRACE_PERIOD);
        if self.is_pid_alive(pid) {
            self.terminate_pid(pid, true);
        }
        self.remove_lock_files(profile_dir)?;
        Ok(1)
    }

    #[cfg(unix)]
    fn terminate_pid(&self, pid: u32, force: bool) {
        let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    }

    #[cfg(not(unix))]
    fn terminate_pid(&self, pid: u32, _force: bool) {
        let mut system = self.system.lock();
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        if let Some(process) = system.process(Pid::from_u32(pid)) {
            process.kill();
        }
    }

    /// Called by the Browser Instance launch procedure before a launch that
    /// targets an existing profile directory. If a live lock is held,
    /// either reclaim it (when `kill_orphaned` is set) or fail fast naming
    /// the flag so the caller knows how to proceed.
    pub fn ensure_available(&self, profile_name: &str, profile_dir: &Path, kill_orphaned: bool) -> Result<()> {
        match self.check_live_lock(profile_dir) {
            None => Ok(()),
            Some(_) if kill_orphaned => {
                self.kill_orphans_for(profile_dir)?;
                Ok(())
            }
            Some(pid) => Err(FleetError::ProfileLocked { profile: profile_name.to_string(), pid: Some(pid) }),
        }
    }
}
