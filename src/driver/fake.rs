//! In-memory `Driver` double. No Chrome process, no sockets — lets every
//! other component's tests exercise navigation, tab, and cookie behavior
//! without ever spawning a real browser.

use super::{Cookie, Driver, WindowHandle};
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

struct Tab {
    handle: String,
    url: String,
    title: String,
    source: String,
}

struct State {
    tabs: Vec<Tab>,
    current: usize,
    cookies: Vec<Cookie>,
    startup_scripts: Vec<String>,
    quit: bool,
    next_handle: u32,
    cert_trap: Option<String>,
}

/// A fake browser with one "about:blank" tab by default. Navigation just
/// records the URL; `title` is derived from the URL unless the test wants
/// something else via [`FakeDriver::set_title`].
pub struct FakeDriver {
    state: Mutex<State>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                tabs: vec![Tab { handle: "tab-1".to_string(), url: "about:blank".to_string(), title: "".to_string(), source: String::new() }],
                current: 0,
                cookies: Vec::new(),
                startup_scripts: Vec::new(),
                quit: false,
                next_handle: 2,
                cert_trap: None,
            }),
        }
    }

    /// Arrange for any `navigate()` whose URL contains `domain_substr` to land
    /// on a simulated certificate-warning interstitial, the way a real self-signed
    /// host would. The navigated URL itself is left untouched — only title and
    /// `page_source()` change — exercising the body-text branch of interstitial
    /// detection rather than the URL-prefix branch.
    pub fn set_cert_trap_domain(&self, domain_substr: &str) {
        self.state.lock().cert_trap = Some(domain_substr.to_string());
    }

    pub fn set_title(&self, title: &str) {
        let mut state = self.state.lock();
        let idx = state.current;
        state.tabs[idx].title = title.to_string();
    }

    /// Simulate an error-interstitial page: title and URL both characteristic
    /// of Chrome's network-error page.
    pub fn simulate_error_page(&self) {
        let mut state = self.state.lock();
        let idx = state.current;
        state.tabs[idx].url = "chrome-error://chromewebdata/".to_string();
        state.tabs[idx].title = "This site can't be reached".to_string();
    }

    /// Simulate a certificate-warning interstitial that keeps the navigated
    /// URL (e.g. after `Page.navigate` to a self-signed host) but whose body
    /// text gives away the block — the case the URL-only check misses.
    pub fn simulate_cert_warning_page(&self) {
        let mut state = self.state.lock();
        let idx = state.current;
        state.tabs[idx].title = "Privacy error".to_string();
        state.tabs[idx].source = "Your connection is not private. NET::ERR_CERT_AUTHORITY_INVALID".to_string();
    }

    pub fn startup_scripts(&self) -> Vec<String> {
        self.state.lock().startup_scripts.clone()
    }

    pub fn was_quit(&self) -> bool {
        self.state.lock().quit
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock();
        let idx = state.current;
        state.tabs[idx].url = url.to_string();
        state.tabs[idx].title = url.to_string();
        state.tabs[idx].source.clear();
        if let Some(trap) = state.cert_trap.clone() {
            if url.contains(&trap) {
                state.tabs[idx].title = "Privacy error".to_string();
                state.tabs[idx].source = "Your connection is not private. NET::ERR_CERT_AUTHORITY_INVALID".to_string();
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let state = self.state.lock();
        Ok(state.tabs[state.current].url.clone())
    }

    async fn current_title(&self) -> Result<String> {
        let state = self.state.lock();
        Ok(state.tabs[state.current].title.clone())
    }

    async fn window_handles(&self) -> Result<Vec<WindowHandle>> {
        let state = self.state.lock();
        Ok(state.tabs.iter().map(|t| WindowHandle { id: t.handle.clone(), url: t.url.clone(), title: t.title.clone() }).collect())
    }

    async fn current_window_handle(&self) -> Result<String> {
        let state = self.state.lock();
        Ok(state.tabs[state.current].handle.clone())
    }

    async fn switch_to_window(&self, handle: &str) -> Result<()> {
        let mut state = self.state.lock();
        let idx = state.tabs.iter().position(|t| t.handle == handle).ok_or_else(|| FleetError::Driver(format!("no such window handle: {}", handle)))?;
        state.current = idx;
        Ok(())
    }

    async fn open_new_window(&self, url: &str) -> Result<WindowHandle> {
        let mut state = self.state.lock();
        let handle = format!("tab-{}", state.next_handle);
        state.next_handle += 1;
        state.tabs.push(Tab { handle: handle.clone(), url: url.to_string(), title: url.to_string(), source: String::new() });
        state.current = state.tabs.len() - 1;
        Ok(WindowHandle { id: handle, url: url.to_string(), title: url.to_string() })
    }

    async fn close_window(&self, handle: &str) -> Result<()> {
        let mut state = self.state.lock();
        let idx = state.tabs.iter().position(|t| t.handle == handle).ok_or_else(|| FleetError::Driver(format!("no such window handle: {}", handle)))?;
        state.tabs.remove(idx);
        if state.current >= state.tabs.len() && !state.tabs.is_empty() {
            state.current = state.tabs.len() - 1;
        }
        Ok(())
    }

    async fn get_cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.state.lock().cookies.clone())
    }

    async fn add_cookie(&self, cookie: &Cookie) -> Result<()> {
        let mut state = self.state.lock();
        state.cookies.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain));
        state.cookies.push(cookie.clone());
        Ok(())
    }

    async fn delete_all_cookies(&self) -> Result<()> {
        self.state.lock().cookies.clear();
        Ok(())
    }

    async fn execute_script(&self, _script: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn add_startup_script(&self, script: &str) -> Result<()> {
        self.state.lock().startup_scripts.push(script.to_string());
        Ok(())
    }

    async fn get_screenshot_png(&self) -> Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn page_source(&self) -> Result<String> {
        let state = self.state.lock();
        Ok(state.tabs[state.current].source.clone())
    }

    async fn quit(&self) -> Result<()> {
        self.state.lock().quit = true;
        Ok(())
    }
}

/// Test-only [`crate::instance::InstanceLauncher`]: builds a real
/// `LaunchPlan` (so profile-copy and port-allocation are exercised exactly
/// as production would) but wraps a `FakeDriver` instead of spawning Chrome.
/// Shared by the pool, session, and fleet test suites so none of them needs
/// a real browser binary to exercise profile isolation or pool admission.
#[cfg(test)]
pub struct FakeInstanceLauncher {
    pub profiles: std::sync::Arc<crate::profile::ProfileRegistry>,
    pub reclaimer: std::sync::Arc<crate::reclaim::ProcessReclaimer>,
    pub browser_config: crate::config::schema::BrowserConfig,
}

#[cfg(test)]
#[async_trait]
impl crate::instance::InstanceLauncher for FakeInstanceLauncher {
    async fn launch(&self, options: &crate::launch::LaunchOptions, kill_orphaned: bool) -> Result<crate::instance::Instance> {
        let builder = crate::launch::LaunchOptionsBuilder::new(&self.profiles, &self.reclaimer, self.browser_config.clone());
        let plan = builder.build(options)?;
        if let Some(name) = &plan.profile {
            if let Err(e) = self.profiles.get_dir(name).and_then(|dir| self.reclaimer.ensure_available(name, &dir, kill_orphaned)) {
                builder.release(&plan);
                return Err(e);
            }
        }
        let instance = crate::instance::Instance::from_driver(std::sync::Arc::new(FakeDriver::new()), plan, self.browser_config.clone());
        if let Some(script) = instance.plan().anti_detect_startup_script.clone() {
            instance.driver().add_startup_script(&script).await?;
        }
        Ok(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_navigate_updates_current_tab() {
        let driver = FakeDriver::new();
        driver.navigate("https://example.com").await.unwrap();
        assert_eq!(driver.current_url().await.unwrap(), "https://example.com");
    }

    #[tokio::test]
    async fn test_open_new_window_switches_current_tab() {
        let driver = FakeDriver::new();
        let handle = driver.open_new_window("https://a.test").await.unwrap();
        assert_eq!(driver.current_window_handle().await.unwrap(), handle.id);
        assert_eq!(driver.window_handles().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_add_cookie_dedupes_by_name_and_domain() {
        let driver = FakeDriver::new();
        let cookie = Cookie { name: "sid".into(), value: "1".into(), domain: "example.com".into(), path: "/".into(), secure: false, http_only: false, expires: None, same_site: None };
        driver.add_cookie(&cookie).await.unwrap();
        let mut updated = cookie.clone();
        updated.value = "2".into();
        driver.add_cookie(&updated).await.unwrap();
        let cookies = driver.get_cookies().await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value, "2");
    }

    #[tokio::test]
    async fn test_simulate_error_page_reports_chrome_error_scheme() {
        let driver = FakeDriver::new();
        driver.simulate_error_page();
        assert!(driver.current_url().await.unwrap().starts_with("chrome-error://"));
    }
}
