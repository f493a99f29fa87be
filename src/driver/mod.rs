//! Driver contract (component L): the narrow browser-control surface this
//! crate needs — navigation, window/tab enumeration, cookies, and raw script
//! execution. Automation verbs (click, type, drag, accessibility tree, …)
//! are deliberately not part of this trait; callers that need them talk CDP
//! directly against the instance's debug port.

pub mod cdp;
pub mod fake;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A single browser cookie as returned by / sent to `Network.getCookies` /
/// `Network.setCookie`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// One open tab/window, as enumerated over `/json/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowHandle {
    pub id: String,
    pub url: String,
    pub title: String,
}

/// The control surface a Browser Instance drives. Implemented by `CdpDriver`
/// against a real Chrome process and by `fake::FakeDriver` in tests.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn current_title(&self) -> Result<String>;

    async fn window_handles(&self) -> Result<Vec<WindowHandle>>;
    async fn current_window_handle(&self) -> Result<String>;
    async fn switch_to_window(&self, handle: &str) -> Result<()>;
    async fn open_new_window(&self, url: &str) -> Result<WindowHandle>;
    async fn close_window(&self, handle: &str) -> Result<()>;

    async fn get_cookies(&self) -> Result<Vec<Cookie>>;
    async fn add_cookie(&self, cookie: &Cookie) -> Result<()>;
    async fn delete_all_cookies(&self) -> Result<()>;

    async fn execute_script(&self, script: &str) -> Result<Value>;
    /// Install a script that runs on every subsequent document, the current
    /// one included if it has not yet loaded (CDP
    /// `Page.addScriptToEvaluateOnNewDocument`). Used to install the
    /// anti-detect patch the Launch Options Builder prepares.
    async fn add_startup_script(&self, script: &str) -> Result<()>;

    async fn get_screenshot_png(&self) -> Result<Vec<u8>>;

    /// Raw HTML of the current document, used by the Session Store to detect
    /// a certificate-warning interstitial by body text when the URL alone
    /// (`chrome-error://…`, `data:text/html,chromewebdata`) doesn't give it away.
    async fn page_source(&self) -> Result<String>;

    /// Gracefully disconnect and terminate the underlying browser process.
    /// Must be idempotent.
    async fn quit(&self) -> Result<()>;
}
