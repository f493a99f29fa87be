//! CDP transport: raw WebSocket command/response plumbing plus `/json/*`
//! HTTP target discovery, narrowed to the verbs `Driver` exposes.
//!
//! One WebSocket connects to the *browser* endpoint (`/json/version`'s
//! `webSocketDebuggerUrl`), and every page target is addressed over it via
//! `Target.attachToTarget(flatten: true)` plus the `sessionId` CDP returns —
//! the protocol's own mechanism for multiplexing several targets over one
//! socket, rather than one socket per target. `switch_to_window` and
//! `open_new_window` both attach (or reuse an existing attachment for) the
//! relevant target and update which session subsequent `Page.*`/`Runtime.*`/
//! `Network.*` commands are scoped to.

use super::{Cookie, Driver, WindowHandle};
use crate::error::{FleetError, Result};
use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

const CONNECT_MAX_RETRIES: u32 = 30;
const CONNECT_RETRY_DELAY_MS: u64 = 500;
const COMMAND_TIMEOUT_SECS: u64 = 30;

type WsSink = futures::stream::SplitSink<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, WsMessage>;

/// Drives every target on one Chrome instance over a single browser-level
/// CDP WebSocket, multiplexed by `sessionId`.
pub struct CdpDriver {
    port: u16,
    tx: Mutex<Option<Arc<Mutex<WsSink>>>>,
    responses: Arc<Mutex<HashMap<u32, oneshot::Sender<Value>>>>,
    msg_id: AtomicU32,
    /// `target_id -> sessionId`, populated lazily on first use of a target.
    sessions: Mutex<HashMap<String, String>>,
    /// The target every `Driver` call not naming an explicit handle applies to.
    current_target: Mutex<String>,
    /// Scripts installed via `add_startup_script`, re-applied to every newly
    /// attached target so they survive opening a new tab, not just navigation.
    startup_scripts: Mutex<Vec<String>>,
}

impl CdpDriver {
    /// Connect to the browser endpoint on `port` and attach to its first
    /// "page" target. Retries for up to `CONNECT_MAX_RETRIES *
    /// CONNECT_RETRY_DELAY_MS` while Chrome finishes starting up.
    pub async fn connect(port: u16) -> Result<Self> {
        let driver = Self {
            port,
            tx: Mutex::new(None),
            responses: Arc::new(Mutex::new(HashMap::new())),
            msg_id: AtomicU32::new(1),
            sessions: Mutex::new(HashMap::new()),
            current_target: Mutex::new(String::new()),
            startup_scripts: Mutex::new(Vec::new()),
        };
        driver.connect_websocket().await?;
        Ok(driver)
    }

    async fn retry<T, F, Fut>(&self, what: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, String>>,
    {
        let mut last_error = String::new();
        for attempt in 0..CONNECT_MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(CONNECT_RETRY_DELAY_MS)).await;
            }
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => last_error = e,
            }
        }
        Err(FleetError::Driver(format!("failed to {} on port {} after {} retries: {}", what, self.port, CONNECT_MAX_RETRIES, last_error)))
    }

    async fn connect_websocket(&self) -> Result<()> {
        let ws_url = self.retry("discover the browser CDP websocket", || self.try_find_browser_ws_url()).await?;
        self.setup_ws_connection(&ws_url).await?;

        let target_id = self.retry("find a page target", || self.try_find_first_page_target()).await?;
        *self.current_target.lock().await = target_id.clone();
        self.ensure_attached(&target_id).await?;
        Ok(())
    }

    async fn try_find_browser_ws_url(&self) -> std::result::Result<String, String> {
        let url = format!("http://127.0.0.1:{}/json/version", self.port);
        let resp = reqwest::get(&url).await.map_err(|e| e.to_string())?;
        let body: Value = resp.json().await.map_err(|e| e.to_string())?;
        body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()).map(|s| s.to_string()).ok_or_else(|| "no browser webSocketDebuggerUrl in /json/version".to_string())
    }

    async fn try_find_first_page_target(&self) -> std::result::Result<String, String> {
        let targets = self.http_get("/json/list").await.map_err(|e| e.to_string())?;
        targets
            .as_array()
            .and_then(|arr| arr.iter().find(|t| t.get("type").and_then(|v| v.as_str()) == Some("page")))
            .and_then(|t| t.get("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "no page target in /json/list".to_string())
    }

    async fn setup_ws_connection(&self, ws_url: &str) -> Result<()> {
        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| FleetError::Driver(format!("websocket connect failed: {}", e)))?;
        let (sink, mut stream) = ws_stream.split();
        *self.tx.lock().await = Some(Arc::new(Mutex::new(sink)));

        let responses = self.responses.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let Ok(WsMessage::Text(text)) = msg else { continue };
                let Ok(parsed) = serde_json::from_str::<Value>(&text) else { continue };
                if let Some(id) = parsed.get("id").and_then(|v| v.as_u64()) {
                    if let Some(sender) = responses.lock().await.remove(&(id as u32)) {
                        let _ = sender.send(parsed);
                    }
                }
            }
        });

        Ok(())
    }

    /// Attach (or reuse an existing attachment) to `target_id`, enable
    /// `Page`/`Runtime` on its session, and install every startup script
    /// registered so far. Returns the CDP `sessionId` for that target.
    async fn ensure_attached(&self, target_id: &str) -> Result<String> {
        if let Some(sid) = self.sessions.lock().await.get(target_id).cloned() {
            return Ok(sid);
        }

        let result = self.send_command_session("Target.attachToTarget", json!({ "targetId": target_id, "flatten": true }), None).await?;
        let session_id = result
            .get("result")
            .and_then(|r| r.get("sessionId"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| FleetError::Driver("Target.attachToTarget did not return a sessionId".into()))?
            .to_string();
        self.sessions.lock().await.insert(target_id.to_string(), session_id.clone());

        self.send_command_session("Page.enable", json!({}), Some(session_id.clone())).await?;
        self.send_command_session("Runtime.enable", json!({}), Some(session_id.clone())).await?;

        let scripts = self.startup_scripts.lock().await.clone();
        for script in scripts {
            self.send_command_session("Page.addScriptToEvaluateOnNewDocument", json!({ "source": script }), Some(session_id.clone())).await?;
        }

        Ok(session_id)
    }

    async fn send_to_target(&self, target_id: &str, method: &str, params: Value) -> Result<Value> {
        let session_id = self.ensure_attached(target_id).await?;
        self.send_command_session(method, params, Some(session_id)).await
    }

    async fn send_to_current(&self, method: &str, params: Value) -> Result<Value> {
        let target_id = self.current_target.lock().await.clone();
        self.send_to_target(&target_id, method, params).await
    }

    async fn send_command_session(&self, method: &str, params: Value, session_id: Option<String>) -> Result<Value> {
        let tx_guard = self.tx.lock().await;
        let tx = tx_guard.as_ref().ok_or_else(|| FleetError::Driver("not connected".into()))?.clone();
        drop(tx_guard);

        let id = self.msg_id.fetch_add(1, Ordering::SeqCst);
        let (resp_tx, resp_rx) = oneshot::channel();
        self.responses.lock().await.insert(id, resp_tx);

        let mut command = json!({ "id": id, "method": method, "params": params });
        if let Some(sid) = session_id {
            command["sessionId"] = json!(sid);
        }

        tx.lock().await.send(WsMessage::Text(command.to_string())).await.map_err(|e| FleetError::Driver(format!("send failed: {}", e)))?;

        match tokio::time::timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS), resp_rx).await {
            Ok(Ok(response)) => {
                if let Some(err) = response.get("error") {
                    return Err(FleetError::Driver(format!("CDP error calling {}: {}", method, err)));
                }
                Ok(response)
            }
            Ok(Err(_)) => Err(FleetError::Driver("response channel closed".into())),
            Err(_) => Err(FleetError::TimeoutError(Duration::from_secs(COMMAND_TIMEOUT_SECS))),
        }
    }

    async fn eval(&self, expression: &str) -> Result<Value> {
        let result = self.send_to_current("Runtime.evaluate", json!({ "expression": expression, "returnByValue": true, "awaitPromise": true })).await?;
        if let Some(exc) = result.get("result").and_then(|r| r.get("exceptionDetails")) {
            let text = exc.get("text").and_then(|t| t.as_str()).unwrap_or("JS evaluation error");
            return Err(FleetError::Driver(text.to_string()));
        }
        Ok(result.get("result").and_then(|r| r.get("result")).and_then(|r| r.get("value")).cloned().unwrap_or(Value::Null))
    }

    async fn http_get(&self, path: &str) -> Result<Value> {
        let url = format!("http://127.0.0.1:{}{}", self.port, path);
        let resp = reqwest::get(&url).await.map_err(|e| FleetError::Driver(e.to_string()))?;
        resp.json().await.map_err(|e| FleetError::Driver(e.to_string()))
    }
}

#[async_trait]
impl Driver for CdpDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.send_to_current("Page.navigate", json!({ "url": url })).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.eval("window.location.href").await?.as_str().unwrap_or_default().to_string())
    }

    async fn current_title(&self) -> Result<String> {
        Ok(self.eval("document.title").await?.as_str().unwrap_or_default().to_string())
    }

    async fn window_handles(&self) -> Result<Vec<WindowHandle>> {
        let targets = self.http_get("/json/list").await?;
        let handles = targets
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
                    .map(|t| WindowHandle {
                        id: t.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        url: t.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                        title: t.get("title").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(handles)
    }

    /// The target this driver is currently scoped to — tracked directly
    /// rather than reverse-matched by URL, since the driver now attaches a
    /// distinct CDP session per target and always knows which one is current.
    async fn current_window_handle(&self) -> Result<String> {
        Ok(self.current_target.lock().await.clone())
    }

    async fn switch_to_window(&self, handle: &str) -> Result<()> {
        self.ensure_attached(handle).await?;
        self.http_get(&format!("/json/activate/{}", handle)).await?;
        *self.current_target.lock().await = handle.to_string();
        Ok(())
    }

    async fn open_new_window(&self, url: &str) -> Result<WindowHandle> {
        let target = self.http_get(&format!("/json/new?{}", url)).await?;
        let id = target.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let out_url = target.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let title = target.get("title").and_then(|v| v.as_str()).unwrap_or_default().to_string();

        self.ensure_attached(&id).await?;
        *self.current_target.lock().await = id.clone();

        Ok(WindowHandle { id, url: out_url, title })
    }

    async fn close_window(&self, handle: &str) -> Result<()> {
        self.http_get(&format!("/json/close/{}", handle)).await?;
        self.sessions.lock().await.remove(handle);
        Ok(())
    }

    async fn get_cookies(&self) -> Result<Vec<Cookie>> {
        let result = self.send_to_current("Network.getCookies", json!({})).await?;
        let raw = result.get("result").and_then(|r| r.get("cookies")).cloned().unwrap_or(Value::Array(vec![]));
        let cookies: Vec<CdpCookie> = serde_json::from_value(raw).unwrap_or_default();
        Ok(cookies.into_iter().map(Cookie::from).collect())
    }

    async fn add_cookie(&self, cookie: &Cookie) -> Result<()> {
        let mut params = json!({
            "name": cookie.name,
            "value": cookie.value,
            "domain": cookie.domain,
            "path": cookie.path,
            "secure": cookie.secure,
            "httpOnly": cookie.http_only,
        });
        if let Some(same_site) = &cookie.same_site {
            params["sameSite"] = json!(same_site);
        }
        let result = self.send_to_current("Network.setCookie", params).await?;
        let ok = result.get("result").and_then(|r| r.get("success")).and_then(|v| v.as_bool()).unwrap_or(false);
        if ok {
            Ok(())
        } else {
            Err(FleetError::Driver(format!("Network.setCookie rejected cookie '{}'", cookie.name)))
        }
    }

    async fn delete_all_cookies(&self) -> Result<()> {
        self.send_to_current("Network.clearBrowserCookies", json!({})).await?;
        Ok(())
    }

    async fn execute_script(&self, script: &str) -> Result<Value> {
        self.eval(script).await
    }

    /// Install a script on every session attached so far and remember it so
    /// every future `switch_to_window`/`open_new_window` target picks it up
    /// via `ensure_attached` too — this is what makes the script survive
    /// opening a brand new tab, not just navigating the current one.
    async fn add_startup_script(&self, script: &str) -> Result<()> {
        self.startup_scripts.lock().await.push(script.to_string());
        let target_ids: Vec<String> = self.sessions.lock().await.keys().cloned().collect();
        for target_id in target_ids {
            self.send_to_target(&target_id, "Page.addScriptToEvaluateOnNewDocument", json!({ "source": script })).await?;
        }
        Ok(())
    }

    async fn get_screenshot_png(&self) -> Result<Vec<u8>> {
        let result = self.send_to_current("Page.captureScreenshot", json!({ "format": "png" })).await?;
        let data = result.get("result").and_then(|r| r.get("data")).and_then(|v| v.as_str()).ok_or_else(|| FleetError::Driver("no screenshot data returned".into()))?;
        base64::engine::general_purpose::STANDARD.decode(data).map_err(|e| FleetError::Driver(format!("invalid base64 screenshot: {}", e)))
    }

    async fn page_source(&self) -> Result<String> {
        Ok(self.eval("document.documentElement.outerHTML").await?.as_str().unwrap_or_default().to_string())
    }

    async fn quit(&self) -> Result<()> {
        let mut guard = self.tx.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.lock().await.close().await;
        }
        Ok(())
    }
}

#[derive(Debug, serde::Deserialize)]
struct CdpCookie {
    name: String,
    value: String,
    domain: String,
    path: String,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    #[serde(rename = "httpOnly")]
    http_only: bool,
    #[serde(default)]
    expires: Option<f64>,
    #[serde(default)]
    #[serde(rename = "sameSite")]
    same_site: Option<String>,
}

impl From<CdpCookie> for Cookie {
    fn from(c: CdpCookie) -> Self {
        Cookie { name: c.name, value: c.value, domain: c.domain, path: c.path, secure: c.secure, http_only: c.http_only, expires: c.expires, same_site: c.same_site }
    }
}
