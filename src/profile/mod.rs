//! Profile Registry: maps a logical profile name to a stable on-disk
//! directory, with a JSON metadata catalog persisted alongside it.

use crate::config::schema::{ProfileMeta, ProfileRecord};
use crate::config::storage::atomic_write;
use crate::error::{FleetError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_PROFILE: &str = "default";

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

struct Catalog {
    profiles: HashMap<String, ProfileMeta>,
    loaded: bool,
}

/// Owns the on-disk profile tree: `<root>/profiles.json` plus one directory
/// per profile under `<root>`.
pub struct ProfileRegistry {
    root: PathBuf,
    catalog: Mutex<Catalog>,
}

impl ProfileRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            catalog: Mutex::new(Catalog { profiles: HashMap::new(), loaded: false }),
        }
    }

    fn catalog_path(&self) -> PathBuf {
        self.root.join("profiles.json")
    }

    fn profile_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Lazy initialization invariant: if the in-memory view is empty, load
    /// the catalog from disk before doing anything else. A freshly
    /// constructed registry that never calls this would silently claim no
    /// profiles exist even though `profiles.json` is sitting right there.
    fn ensure_initialized(&self, catalog: &mut Catalog) -> Result<()> {
        if catalog.loaded {
            return Ok(());
        }
        let path = self.catalog_path();
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            catalog.profiles = serde_json::from_str(&text)?;
        }
        catalog.loaded = true;
        Ok(())
    }

    fn persist(&self, catalog: &Catalog) -> Result<()> {
        let body = serde_json::to_vec_pretty(&catalog.profiles)?;
        atomic_write(&self.catalog_path(), &body)?;
        Ok(())
    }

    /// Create a new profile. Fails if the name already exists.
    pub fn create(&self, name: &str, description: &str) -> Result<PathBuf> {
        crate::config::validation::validate_profile_name(name)?;
        let mut catalog = self.catalog.lock();
        self.ensure_initialized(&mut catalog)?;

        if catalog.profiles.contains_key(name) {
            return Err(FleetError::ProfileExists(name.to_string()));
        }

        let dir = self.profile_dir(name);
        std::fs::create_dir_all(&dir)?;
        let now = now_unix();
        catalog
            .profiles
            .insert(name.to_string(), ProfileMeta { description: description.to_string(), created_at: now, last_used: now });
        self.persist(&catalog)?;
        Ok(dir)
    }

    /// Idempotently return the reserved `"default"` profile, creating it if missing.
    pub fn ensure_default(&self) -> Result<PathBuf> {
        let mut catalog = self.catalog.lock();
        self.ensure_initialized(&mut catalog)?;
        if catalog.profiles.contains_key(DEFAULT_PROFILE) {
            drop(catalog);
            return self.get_dir(DEFAULT_PROFILE);
        }
        let dir = self.profile_dir(DEFAULT_PROFILE);
        std::fs::create_dir_all(&dir)?;
        let now = now_unix();
        catalog
            .profiles
            .insert(DEFAULT_PROFILE.to_string(), ProfileMeta { description: "Default profile".to_string(), created_at: now, last_used: now });
        self.persist(&catalog)?;
        Ok(dir)
    }

    /// Resolve a profile name to its directory. Fails if the name is
    /// unknown — deliberately, unlike the source this crate is grounded on,
    /// which silently creates the directory on a miss. Auto-vivifying a
    /// profile on a typo'd name hides the bug that produced the typo.
    pub fn get_dir(&self, name: &str) -> Result<PathBuf> {
        let mut catalog = self.catalog.lock();
        self.ensure_initialized(&mut catalog)?;
        if !catalog.profiles.contains_key(name) {
            return Err(FleetError::ProfileNotFound(name.to_string()));
        }
        let now = now_unix();
        if let Some(meta) = catalog.profiles.get_mut(name) {
            meta.last_used = now;
        }
        self.persist(&catalog)?;
        Ok(self.profile_dir(name))
    }

    /// Delete a profile's directory and metadata. Returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let mut catalog = self.catalog.lock();
        self.ensure_initialized(&mut catalog)?;
        let existed = catalog.profiles.remove(name).is_some();
        let dir = self.profile_dir(name);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        self.persist(&catalog)?;
        Ok(existed)
    }

    /// Copy an existing profile's directory and metadata under a new name.
    /// Fails if `src` is missing or `dst` already exists.
    pub fn copy(&self, src: &str, dst: &str) -> Result<PathBuf> {
        crate::config::validation::validate_profile_name(dst)?;
        let mut catalog = self.catalog.lock();
        self.ensure_initialized(&mut catalog)?;

        let src_meta = catalog.profiles.get(src).cloned().ok_or_else(|| FleetError::ProfileNotFound(src.to_string()))?;
        if catalog.profiles.contains_key(dst) {
            return Err(FleetError::ProfileExists(dst.to_string()));
        }

        let src_dir = self.profile_dir(src);
        let dst_dir = self.profile_dir(dst);
        if dst_dir.exists() {
            return Err(FleetError::ProfileExists(dst.to_string()));
        }
        copy_dir_all(&src_dir, &dst_dir)?;

        let now = now_unix();
        catalog.profiles.insert(
            dst.to_string(),
            ProfileMeta { description: format!("Copy of {}", src), created_at: now, last_used: src_meta.last_used },
        );
        self.persist(&catalog)?;
        Ok(dst_dir)
    }

    /// List every known profile along with whether its directory still exists on disk.
    pub fn list(&self) -> Result<Vec<ProfileRecord>> {
        let mut catalog = self.catalog.lock();
        self.ensure_initialized(&mut catalog)?;
        let mut out: Vec<ProfileRecord> = catalog
            .profiles
            .iter()
            .map(|(name, meta)| ProfileRecord {
                name: name.clone(),
                description: meta.description.clone(),
                created_at: meta.created_at,
                last_used: meta.last_used,
                exists: self.profile_dir(name).exists(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

/// Recursively copy `src` into `dst`. `dst` must not already exist.
fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    let mut stack = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        for entry in std::fs::read_dir(&from)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let src_path = entry.path();
            let dst_path = to.join(entry.file_name());
            if file_type.is_dir() {
                std::fs::create_dir_all(&dst_path)?;
                stack.push((src_path, dst_path));
            } else if file_type.is_file() {
                std::fs::copy(&src_path, &dst_path)?;
            } else if file_type.is_symlink() {
                // Singleton lock files are symlinks pointing at a host-pid
                // marker; skip them entirely rather than copy a dangling
                // symlink into the new profile directory.
                continue;
            }
        }
    }
    Ok(())
}

/// Returns true if `dir` has any entries at all (used by the Launch Options
/// Builder to decide whether a profile's tree needs copying or can start empty).
pub fn dir_is_nonempty(dir: &Path) -> bool {
    std::fs::read_dir(dir).map(|mut rd| rd.next().is_some()).unwrap_or(false)
}
