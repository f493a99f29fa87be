//! Session Store (component F): captures a multi-tab snapshot of a Browser
//! Instance — URLs, titles, cookies, and active-tab identity — and restores
//! it faithfully into a fresh Instance, skipping cookie installation on
//! certificate-warning interstitials so cookies are never planted on a page
//! that never actually loaded.

use crate::driver::Cookie;
use crate::error::{FleetError, Result};
use crate::instance::Instance;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// One tab as recorded in a snapshot, in source enumeration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabRecord {
    pub handle: String,
    pub url: String,
    pub title: String,
}

/// Persisted multi-tab snapshot of an Instance, exactly the shape in the
/// on-disk session record (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub name: Option<String>,
    pub created_at: u64,
    pub profile: Option<String>,
    pub active_tab_handle: String,
    pub url: String,
    pub title: String,
    pub cookies: Vec<Cookie>,
    pub tabs: Vec<TabRecord>,
    pub window_handles_count: usize,
}

/// Catalog entry: the snapshot minus the bulk cookie/tab arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub name: Option<String>,
    pub created_at: u64,
    pub profile: Option<String>,
    pub active_tab_handle: String,
    pub url: String,
    pub title: String,
    pub window_handles_count: usize,
}

impl From<&Snapshot> for SessionSummary {
    fn from(s: &Snapshot) -> Self {
        Self {
            id: s.id,
            name: s.name.clone(),
            created_at: s.created_at,
            profile: s.profile.clone(),
            active_tab_handle: s.active_tab_handle.clone(),
            url: s.url.clone(),
            title: s.title.clone(),
            window_handles_count: s.window_handles_count,
        }
    }
}

/// Tally of cookie installation outcomes during a restore, replacing the
/// exception-swallowing control flow of the source this is grounded on with
/// an explicit count the caller can log or assert on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CookieCounts {
    pub installed: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl std::ops::AddAssign for CookieCounts {
    fn add_assign(&mut self, other: Self) {
        self.installed += other.installed;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Outcome of a restore: the new handle for every saved tab plus the
/// aggregate cookie tally across all tabs.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub handle_map: HashMap<String, String>,
    pub cookies: CookieCounts,
}

struct Catalog {
    sessions: HashMap<Uuid, SessionSummary>,
    loaded: bool,
}

/// Owns `<root>/sessions.json` plus one `<root>/<id>/session.json` per
/// session. Mirrors the lazy-initialization and atomic-write discipline of
/// the Profile Registry.
pub struct SessionStore {
    root: PathBuf,
    catalog: Mutex<Catalog>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), catalog: Mutex::new(Catalog { sessions: HashMap::new(), loaded: false }) }
    }

    fn catalog_path(&self) -> PathBuf {
        self.root.join("sessions.json")
    }

    fn session_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    fn session_file(&self, id: Uuid) -> PathBuf {
        self.session_dir(id).join("session.json")
    }

    fn ensure_initialized(&self, catalog: &mut Catalog) -> Result<()> {
        if catalog.loaded {
            return Ok(());
        }
        let path = self.catalog_path();
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let raw: HashMap<Uuid, SessionSummary> = serde_json::from_str(&text)?;
            catalog.sessions = raw;
        }
        catalog.loaded = true;
        Ok(())
    }

    fn persist_catalog(&self, catalog: &Catalog) -> Result<()> {
        let body = serde_json::to_vec_pretty(&catalog.sessions)?;
        crate::config::storage::atomic_write(&self.catalog_path(), &body)?;
        Ok(())
    }

    /// Capture every tab's URL/title/cookies and active-tab identity from
    /// `instance`, persist it, and return the new session id.
    pub async fn save(&self, instance: &Instance, name: Option<String>) -> Result<Uuid> {
        let original_active = instance.current_window_handle().await.unwrap_or_default();
        let handles = instance.window_handles().await?;

        let mut tabs = Vec::with_capacity(handles.len());
        let mut last_real_page_handle: Option<String> = None;
        let mut cookies: Vec<Cookie> = Vec::new();

        for handle in &handles {
            if instance.switch_to_window(&handle.id).await.is_err() {
                tabs.push(TabRecord { handle: handle.id.clone(), url: "about:blank".to_string(), title: String::new() });
                continue;
            }
            let url = instance.current_url().await.unwrap_or_else(|_| "about:blank".to_string());
            let title = instance.current_title().await.unwrap_or_default();

            if is_real_page(&url) {
                last_real_page_handle = Some(handle.id.clone());
            }
            if is_http_url(&url) {
                if let Ok(tab_cookies) = instance.get_cookies().await {
                    cookies.extend(tab_cookies);
                }
            }

            tabs.push(TabRecord { handle: handle.id.clone(), url, title });
        }

        let active_tab_handle = effective_active_tab(&tabs, &original_active, &last_real_page_handle);

        // Side effects of enumerating tabs should be invisible to the caller.
        let restore_target = if tabs.iter().any(|t| t.handle == original_active) { original_active.clone() } else { active_tab_handle.clone() };
        let _ = instance.switch_to_window(&restore_target).await;

        let (url, title) = tabs
            .iter()
            .find(|t| t.handle == active_tab_handle)
            .map(|t| (t.url.clone(), t.title.clone()))
            .unwrap_or_default();

        let cookies = dedup_cookies(cookies);
        let window_handles_count = tabs.len();

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            name,
            created_at: now_unix(),
            profile: instance.profile_name.clone(),
            active_tab_handle,
            url,
            title,
            cookies,
            tabs,
            window_handles_count,
        };

        self.persist_snapshot(&snapshot)?;
        Ok(snapshot.id)
    }

    fn persist_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        std::fs::create_dir_all(self.session_dir(snapshot.id))?;
        let body = serde_json::to_vec_pretty(snapshot)?;
        crate::config::storage::atomic_write(&self.session_file(snapshot.id), &body)?;

        let mut catalog = self.catalog.lock();
        self.ensure_initialized(&mut catalog)?;
        catalog.sessions.insert(snapshot.id, SessionSummary::from(snapshot));
        self.persist_catalog(&catalog)
    }

    /// Load a persisted snapshot by id.
    pub fn get(&self, id: Uuid) -> Result<Snapshot> {
        let path = self.session_file(id);
        if !path.exists() {
            return Err(FleetError::SessionNotFound(id.to_string()));
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Restore a persisted snapshot into a freshly-acquired `instance`. The
    /// instance's existing first window becomes the snapshot's first tab;
    /// every subsequent tab is opened as a new window.
    pub async fn restore(&self, id: Uuid, instance: &Instance) -> Result<RestoreReport> {
        let snapshot = self.get(id)?;
        let mut report = RestoreReport::default();

        if snapshot.tabs.is_empty() {
            return Ok(report);
        }

        let existing = instance.window_handles().await?;
        let first_handle = existing.first().map(|h| h.id.clone()).ok_or_else(|| FleetError::Driver("instance has no initial window".into()))?;

        for (i, tab) in snapshot.tabs.iter().enumerate() {
            let new_handle = if i == 0 {
                instance.navigate(&tab.url).await.ok();
                first_handle.clone()
            } else {
                match instance.open_new_window(&tab.url).await {
                    Ok(h) => h.id,
                    Err(e) => {
                        tracing::warn!(session_id = %id, tab_url = %tab.url, "failed to open tab during restore: {}", e);
                        continue;
                    }
                }
            };
            report.handle_map.insert(tab.handle.clone(), new_handle.clone());

            let counts = self.install_cookies_for_tab(instance, &new_handle, tab, &snapshot.cookies).await;
            report.cookies += counts;
        }

        let switch_to = report
            .handle_map
            .get(&snapshot.active_tab_handle)
            .cloned()
            .or_else(|| snapshot.tabs.first().and_then(|t| report.handle_map.get(&t.handle).cloned()));
        if let Some(handle) = switch_to {
            let _ = instance.switch_to_window(&handle).await;
        }

        Ok(report)
    }

    async fn install_cookies_for_tab(&self, instance: &Instance, new_handle: &str, tab: &TabRecord, cookies: &[Cookie]) -> CookieCounts {
        let mut counts = CookieCounts::default();
        if instance.switch_to_window(new_handle).await.is_err() {
            return counts;
        }

        let Some((scheme, host)) = scheme_and_host(&tab.url) else {
            return counts;
        };
        let domain_root = format!("{}://{}/", scheme, host);
        if instance.navigate(&domain_root).await.is_err() {
            return counts;
        }

        let interstitial = match self.detect_interstitial(instance).await {
            Ok(v) => v,
            Err(_) => true,
        };

        if interstitial {
            let applicable = cookies.iter().filter(|c| matches_domain(&host, &c.domain)).count() as u32;
            counts.skipped += applicable;
        } else {
            for cookie in cookies.iter().filter(|c| matches_domain(&host, &c.domain)) {
                match instance.add_cookie(cookie.clone()).await {
                    Ok(()) => counts.installed += 1,
                    Err(e) => {
                        tracing::warn!(cookie = %cookie.name, domain = %cookie.domain, "failed to install cookie during restore: {}", e);
                        counts.failed += 1;
                    }
                }
            }
        }

        let _ = instance.navigate(&tab.url).await;
        counts
    }

    /// Detect an error interstitial per §4.6 step 3: a `chrome-error://` or
    /// `data:text/html,chromewebdata` URL, or body text characteristic of a
    /// certificate warning.
    async fn detect_interstitial(&self, instance: &Instance) -> Result<bool> {
        let url = instance.current_url().await?;
        if is_interstitial_url(&url) {
            return Ok(true);
        }
        let source = instance.page_source().await.unwrap_or_default();
        Ok(is_interstitial_body(&source))
    }

    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut catalog = self.catalog.lock();
        self.ensure_initialized(&mut catalog)?;
        let mut out: Vec<SessionSummary> = catalog.sessions.values().cloned().collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    pub fn rename(&self, id: Uuid, new_name: String) -> Result<()> {
        let mut snapshot = self.get(id)?;
        snapshot.name = Some(new_name);
        self.persist_snapshot(&snapshot)
    }

    pub fn delete(&self, id: Uuid) -> Result<bool> {
        let mut catalog = self.catalog.lock();
        self.ensure_initialized(&mut catalog)?;
        let existed = catalog.sessions.remove(&id).is_some();
        let dir = self.session_dir(id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        self.persist_catalog(&catalog)?;
        Ok(existed)
    }
}

/// Internal "new tab"/blank/error placeholders, per §3: never chosen as the
/// active tab if a real-page tab exists, but always preserved structurally.
fn is_real_page(url: &str) -> bool {
    let u = url.trim();
    if u.is_empty() || u == "about:blank" || u == "data:," {
        return false;
    }
    if u.starts_with("chrome://") && (u.contains("newtab") || u.contains("new-tab")) {
        return false;
    }
    if u.starts_with("chrome-error://") {
        return false;
    }
    true
}

/// Cookies are only meaningful (and only readable without CDP complaining)
/// on actual HTTP(S) documents, never `file://`, `ftp://`, or `chrome://` tabs.
fn is_http_url(url: &str) -> bool {
    let u = url.trim();
    u.starts_with("http://") || u.starts_with("https://")
}

fn effective_active_tab(tabs: &[TabRecord], original_active: &str, last_real_page_handle: &Option<String>) -> String {
    if let Some(t) = tabs.iter().find(|t| t.handle == original_active) {
        if is_real_page(&t.url) {
            return t.handle.clone();
        }
    }
    if let Some(h) = last_real_page_handle {
        return h.clone();
    }
    tabs.first().map(|t| t.handle.clone()).unwrap_or_default()
}

/// Deduplicate on `(name, domain)`, preserving first occurrence.
fn dedup_cookies(cookies: Vec<Cookie>) -> Vec<Cookie> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(cookies.len());
    for c in cookies {
        let key = (c.name.clone(), c.domain.clone());
        if seen.insert(key) {
            out.push(c);
        }
    }
    out
}

fn is_interstitial_url(url: &str) -> bool {
    url.starts_with("data:text/html,chromewebdata") || url.starts_with("chrome-error:")
}

fn is_interstitial_body(source: &str) -> bool {
    let lower = source.to_lowercase();
    lower.contains("your connection is not private") || lower.contains("net::err_cert")
}

/// Split `scheme://[user@]host[:port]/path` into `(scheme, host)`, dropping
/// userinfo and port — the pieces needed to build a domain-root URL and to
/// match cookies by host.
fn scheme_and_host(url: &str) -> Option<(String, String)> {
    let (scheme, rest) = url.split_once("://")?;
    let authority_and_path = rest;
    let authority = authority_and_path.split(['/', '?', '#']).next().unwrap_or(authority_and_path);
    let hostport = authority.rsplit('@').next().unwrap_or(authority);
    let host = hostport.split(':').next().unwrap_or(hostport);
    if host.is_empty() {
        return None;
    }
    Some((scheme.to_string(), host.to_string()))
}

/// Cookie-domain match per §4.6 step 3: exact, subdomain, or "host ends with
/// cookie domain" (covers a leading-dot cookie domain like `.example.com`).
fn matches_domain(host: &str, cookie_domain: &str) -> bool {
    let cookie_domain = cookie_domain.trim_start_matches('.');
    host == cookie_domain || host.ends_with(&format!(".{}", cookie_domain)) || host.ends_with(cookie_domain)
}
