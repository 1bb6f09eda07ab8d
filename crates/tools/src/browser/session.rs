//! Multi-tenant browser session registry.
//!
//! Each session is one isolated browser: its own process, its own tabs with
//! an active-tab cursor, and its own captured console/network event buffers.
//! The registry bounds how many sessions are resident at once (least-recently
//! -active eviction) and the idle reaper ages out untouched ones. Explicit
//! close, capacity eviction, and idle reaping all converge on the same
//! teardown routine.
//!
//! Lock discipline: the registry mutex guards the id→entry map and is held
//! only for map updates — except capacity eviction, where the victim must be
//! fully torn down before the new entry is installed so the resident count
//! never overshoots. Each session has its own mutex serializing tab-list,
//! cursor, and driver access; it is the only guard held across driver calls.
//! Lock order is always registry first, then session.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use webhive_core::{BrowserConfig, Error, Result};

use super::cdp::CdpConnection;
use super::driver::{self, DriverHandle, LaunchOptions};

/// Session id used when the caller does not supply one.
pub const DEFAULT_SESSION: &str = "default";

/// Append-only event sequence owned by a session, shared with its capture tasks.
pub type EventBuffer = Arc<Mutex<Vec<Value>>>;

/// One tab: a CDP target plus the connection driving it and the capture
/// tasks feeding the owning session's buffers.
pub struct PageHandle {
    pub target_id: String,
    pub cdp: CdpConnection,
    capture_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        for task in &self.capture_tasks {
            task.abort();
        }
    }
}

/// One isolated automation context. Either fully closed (no driver, no tabs)
/// or fully open (driver plus at least one tab); nothing in between survives
/// a completed operation.
pub struct Session {
    pub id: String,
    driver: Option<DriverHandle>,
    tabs: Vec<PageHandle>,
    active_index: usize,
    viewport: (u32, u32),
    pub console_buffer: EventBuffer,
    pub network_buffer: EventBuffer,
    /// Element refs handed out by the most recent snapshot: ref id →
    /// `{backendNodeId, role, name}`.
    pub refs: HashMap<String, Value>,
}

impl Session {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            driver: None,
            tabs: Vec::new(),
            active_index: 0,
            viewport: (0, 0),
            console_buffer: Arc::new(Mutex::new(Vec::new())),
            network_buffer: Arc::new(Mutex::new(Vec::new())),
            refs: HashMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.driver.is_some()
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn tabs(&self) -> &[PageHandle] {
        &self.tabs
    }

    pub fn active_page(&self) -> Option<&PageHandle> {
        self.tabs.get(self.active_index)
    }

    /// Launch the browser and connect its initial page. Caller has already
    /// checked the session is closed.
    async fn open_driver(&mut self, opts: &LaunchOptions) -> Result<()> {
        // A fresh browser starts with fresh capture buffers, even if a prior
        // open/close cycle left stale events behind.
        self.console_buffer.lock().await.clear();
        self.network_buffer.lock().await.clear();
        self.viewport = (opts.width, opts.height);

        let driver = driver::launch(opts).await?;
        let (target_id, ws_url) = driver::first_page_ws_url(driver.debug_port).await?;
        let page = match self.connect_page(target_id, &ws_url).await {
            Ok(page) => page,
            Err(e) => {
                driver.shutdown().await;
                return Err(e);
            }
        };

        self.driver = Some(driver);
        self.tabs = vec![page];
        self.active_index = 0;
        Ok(())
    }

    /// Connect to a page target, enable domains, and bind this session's
    /// capture hooks. Used for the initial page and for every new tab, so
    /// every tab feeds the same session-scoped buffers.
    async fn connect_page(&self, target_id: String, ws_url: &str) -> Result<PageHandle> {
        let cdp = CdpConnection::connect(ws_url).await?;
        cdp.enable_page_domains().await?;
        let (width, height) = self.viewport;
        if width > 0 && height > 0 {
            cdp.set_viewport(width, height).await?;
        }
        let mut page = PageHandle {
            target_id,
            cdp,
            capture_tasks: Vec::new(),
        };
        self.attach_capture(&mut page).await;
        Ok(page)
    }

    async fn attach_capture(&self, page: &mut PageHandle) {
        let mut console_rx = page.cdp.subscribe("Runtime.consoleAPICalled").await;
        let console = self.console_buffer.clone();
        page.capture_tasks.push(tokio::spawn(async move {
            while let Some(params) = console_rx.recv().await {
                console.lock().await.push(console_entry(&params));
            }
        }));

        let mut network_rx = page.cdp.subscribe("Network.requestWillBeSent").await;
        let network = self.network_buffer.clone();
        page.capture_tasks.push(tokio::spawn(async move {
            while let Some(params) = network_rx.recv().await {
                network.lock().await.push(network_entry(&params));
            }
        }));
    }

    /// Open a new tab in the running browser and move the cursor to it.
    async fn create_tab(&mut self) -> Result<usize> {
        let port = self
            .driver
            .as_ref()
            .map(|d| d.debug_port)
            .ok_or_else(|| Error::Session(format!("session '{}' is not open", self.id)))?;
        let active = self
            .active_page()
            .ok_or_else(|| Error::Session(format!("session '{}' has no pages", self.id)))?;

        let target_id = active.cdp.create_target("about:blank").await?;
        let ws_url = driver::target_ws_url(port, &target_id).await?;
        let page = self.connect_page(target_id, &ws_url).await?;

        self.tabs.push(page);
        self.active_index = self.tabs.len() - 1;
        Ok(self.active_index)
    }

    /// Close the tab at `index` (active tab when omitted). Out-of-range is an
    /// error, never a clamp; only the cursor is clamped after removal.
    async fn close_tab(&mut self, index: Option<usize>) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::Session(format!("session '{}' is not open", self.id)));
        }
        let index = index.unwrap_or(self.active_index);
        if index >= self.tabs.len() {
            return Err(Error::NotFound(format!(
                "tab index {} out of range (have {} tabs)",
                index,
                self.tabs.len()
            )));
        }

        let page = &self.tabs[index];
        page.cdp.close_target(&page.target_id).await?;
        self.tabs.remove(index);
        self.active_index = clamp_cursor(self.active_index, self.tabs.len());
        Ok(index)
    }

    fn select_tab(&mut self, index: usize) -> Result<()> {
        if index >= self.tabs.len() {
            return Err(Error::NotFound(format!(
                "tab index {} out of range (have {} tabs)",
                index,
                self.tabs.len()
            )));
        }
        self.active_index = index;
        Ok(())
    }

    /// Release everything this session holds. Idempotent, and safe to call
    /// while driver calls against the session are still in flight — those
    /// fail as ordinary driver errors once the sockets drop.
    async fn teardown(&mut self) {
        if let Some(driver) = self.driver.take() {
            // Pages first, then the browser, then the process; every step is
            // best-effort so a failure in one never skips the next.
            for page in &self.tabs {
                if let Err(e) = page.cdp.close_target(&page.target_id).await {
                    debug!(session = %self.id, target = %page.target_id, "page close failed: {}", e);
                }
            }
            if let Some(page) = self.tabs.first() {
                if let Err(e) = page.cdp.send("Browser.close", json!({})).await {
                    debug!(session = %self.id, "graceful browser close failed: {}", e);
                }
            }
            driver.shutdown().await;
            info!(session = %self.id, "session torn down");
        }
        self.tabs.clear();
        self.active_index = 0;
        self.refs.clear();
        self.console_buffer.lock().await.clear();
        self.network_buffer.lock().await.clear();
    }
}

/// Cursor position after the tab list shrank to `len` entries.
fn clamp_cursor(active: usize, len: usize) -> usize {
    if len == 0 {
        0
    } else if active >= len {
        len - 1
    } else {
        active
    }
}

/// Normalize a console event into the shape stored in the session buffer.
fn console_entry(params: &Value) -> Value {
    let text = params
        .get("args")
        .and_then(Value::as_array)
        .map(|args| {
            args.iter()
                .map(|arg| match arg.get("value") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => arg
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    let location = params
        .get("stackTrace")
        .and_then(|st| st.get("callFrames"))
        .and_then(Value::as_array)
        .and_then(|frames| frames.first())
        .map(|frame| {
            json!({
                "url": frame.get("url").cloned().unwrap_or(json!("")),
                "line": frame.get("lineNumber").cloned().unwrap_or(json!(0)),
            })
        })
        .unwrap_or(Value::Null);

    json!({
        "type": params.get("type").cloned().unwrap_or(json!("log")),
        "text": text,
        "location": location,
    })
}

/// Normalize a network request event into the shape stored in the session buffer.
fn network_entry(params: &Value) -> Value {
    let request = params.get("request");
    let field = |key: &str| {
        request
            .and_then(|r| r.get(key))
            .cloned()
            .unwrap_or(json!(""))
    };
    json!({
        "url": field("url"),
        "method": field("method"),
        "headers": request.and_then(|r| r.get("headers")).cloned().unwrap_or(json!({})),
        "resource_type": params.get("type").cloned().unwrap_or(Value::Null),
    })
}

struct SessionEntry {
    /// Insertion counter; breaks last-activity ties so eviction is deterministic.
    seq: u64,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    session: Arc<Mutex<Session>>,
}

/// The id → session map plus capacity and idle policy.
pub struct SessionRegistry {
    config: BrowserConfig,
    sessions_dir: PathBuf,
    entries: Mutex<HashMap<String, SessionEntry>>,
    next_seq: AtomicU64,
}

impl SessionRegistry {
    pub fn new(config: BrowserConfig, sessions_dir: PathBuf) -> Self {
        Self {
            config,
            sessions_dir,
            entries: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.idle_timeout_secs as i64)
    }

    pub fn reap_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.reap_interval_secs)
    }

    /// Get or lazily create the session for `id`, updating its activity
    /// timestamp. When creating would exceed capacity, the least-recently
    /// -active resident (earliest-inserted on ties) is fully torn down first.
    pub async fn resolve(&self, id: &str) -> Arc<Mutex<Session>> {
        let mut entries = self.entries.lock().await;

        if !entries.contains_key(id) {
            if entries.len() >= self.config.capacity {
                if let Some(victim) = oldest_key(&entries) {
                    info!(session = %victim, "at capacity, evicting least-recently-active session");
                    let handle = entries[&victim].session.clone();
                    // The victim must be fully released before the new entry
                    // is installed; resident count never overshoots capacity.
                    handle.lock().await.teardown().await;
                    entries.remove(&victim);
                }
            }
            let now = Utc::now();
            entries.insert(
                id.to_string(),
                SessionEntry {
                    seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                    created_at: now,
                    last_activity: now,
                    session: Arc::new(Mutex::new(Session::new(id))),
                },
            );
            debug!(session = id, "created session");
        }

        let entry = entries.get_mut(id).expect("entry just ensured");
        entry.last_activity = Utc::now();
        entry.session.clone()
    }

    /// Open the browser for `id`. Idempotent: an already-open session is
    /// reported as such and left untouched.
    pub async fn open(
        &self,
        id: &str,
        headless: Option<bool>,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Value> {
        let handle = self.resolve(id).await;
        let mut session = handle.lock().await;
        if session.is_open() {
            return Ok(json!({
                "status": "already_open",
                "session": id,
                "tabs": session.tab_count(),
            }));
        }
        let opts = self.launch_options(id, headless, width, height);
        session.open_driver(&opts).await?;
        Ok(json!({
            "status": "opened",
            "session": id,
            "headless": opts.headless,
            "viewport": format!("{}x{}", opts.width, opts.height),
        }))
    }

    /// Resolve `id` and make sure its browser is running, opening it with
    /// configured defaults if needed.
    pub async fn ensure_open(&self, id: &str) -> Result<Arc<Mutex<Session>>> {
        let handle = self.resolve(id).await;
        {
            let mut session = handle.lock().await;
            if !session.is_open() {
                let opts = self.launch_options(id, None, None, None);
                session.open_driver(&opts).await?;
                info!(session = id, "auto-opened browser");
            }
        }
        Ok(handle)
    }

    /// Tear down and forget `id`. Closing an unknown or already-closed
    /// session is a no-op, not an error.
    pub async fn close(&self, id: &str) -> Result<Value> {
        let removed = self.entries.lock().await.remove(id);
        match removed {
            Some(entry) => {
                let mut session = entry.session.lock().await;
                let was_open = session.is_open();
                session.teardown().await;
                Ok(json!({"status": "closed", "session": id, "was_open": was_open}))
            }
            None => Ok(json!({"status": "already_closed", "session": id})),
        }
    }

    /// Snapshot of every resident session. Does not touch activity timestamps.
    pub async fn list(&self) -> Vec<Value> {
        let mut snapshot: Vec<(String, DateTime<Utc>, DateTime<Utc>, Arc<Mutex<Session>>)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .map(|(id, e)| (id.clone(), e.created_at, e.last_activity, e.session.clone()))
                .collect()
        };
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));

        let now = Utc::now();
        let mut summaries = Vec::with_capacity(snapshot.len());
        for (id, created_at, last_activity, handle) in snapshot {
            let session = handle.lock().await;
            summaries.push(json!({
                "session": id,
                "is_open": session.is_open(),
                "tabs": session.tab_count(),
                "created_at": created_at.to_rfc3339(),
                "last_activity": last_activity.to_rfc3339(),
                "idle_seconds": (now - last_activity).num_seconds().max(0),
            }));
        }
        summaries
    }

    /// Generate a fresh id and register an (unopened) session for it.
    pub async fn create_session(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.resolve(&id).await;
        id
    }

    /// Tear down every resident session. Used at shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.entries.lock().await.keys().cloned().collect();
        for id in ids {
            let _ = self.close(&id).await;
        }
    }

    // ─── Tab operations ───────────────────────────────────────────────

    pub async fn create_tab(&self, id: &str) -> Result<Value> {
        let handle = self.ensure_open(id).await?;
        let mut session = handle.lock().await;
        let index = session.create_tab().await?;
        Ok(json!({"status": "tab_created", "session": id, "index": index}))
    }

    /// Close a tab. Closing the last remaining tab tears the whole session
    /// down: a resident open session always has at least one page.
    pub async fn close_tab(&self, id: &str, index: Option<usize>) -> Result<Value> {
        let handle = self.resolve(id).await;
        let mut session = handle.lock().await;
        let closed = session.close_tab(index).await?;
        if session.tab_count() == 0 {
            session.teardown().await;
            drop(session);
            self.remove_if_closed(id).await;
            return Ok(json!({
                "status": "tab_closed",
                "session": id,
                "index": closed,
                "session_closed": true,
            }));
        }
        Ok(json!({
            "status": "tab_closed",
            "session": id,
            "index": closed,
            "active": session.active_index(),
        }))
    }

    pub async fn select_tab(&self, id: &str, index: usize) -> Result<Value> {
        let handle = self.resolve(id).await;
        let mut session = handle.lock().await;
        session.select_tab(index)?;
        Ok(json!({"status": "tab_selected", "session": id, "index": index}))
    }

    pub async fn list_tabs(&self, id: &str) -> Result<Value> {
        let handle = self.resolve(id).await;
        let session = handle.lock().await;
        let mut tabs = Vec::with_capacity(session.tab_count());
        for (i, page) in session.tabs().iter().enumerate() {
            let title = page
                .cdp
                .eval_value("document.title")
                .await
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            let url = page
                .cdp
                .eval_value("window.location.href")
                .await
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default();
            tabs.push(json!({
                "index": i,
                "title": title,
                "url": url,
                "active": i == session.active_index(),
            }));
        }
        Ok(json!({"session": id, "count": tabs.len(), "tabs": tabs}))
    }

    // ─── Idle reaping ─────────────────────────────────────────────────

    /// One reaper cycle: tear down every session idle beyond the timeout.
    /// Staleness is re-checked under the registry guard before each pop, so
    /// a session touched after the snapshot survives. Returns reap count.
    pub async fn sweep_idle(&self) -> usize {
        let timeout = self.idle_timeout();
        let now = Utc::now();
        let stale: Vec<String> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, e)| now - e.last_activity > timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut reaped = 0;
        for id in stale {
            let entry = {
                let mut entries = self.entries.lock().await;
                let still_stale = entries
                    .get(&id)
                    .map(|e| Utc::now() - e.last_activity > timeout)
                    .unwrap_or(false);
                if still_stale {
                    entries.remove(&id)
                } else {
                    None
                }
            };
            if let Some(entry) = entry {
                info!(session = %id, "reaping idle session");
                entry.session.lock().await.teardown().await;
                reaped += 1;
            }
        }
        reaped
    }

    // ─── Internals ────────────────────────────────────────────────────

    fn launch_options(
        &self,
        id: &str,
        headless: Option<bool>,
        width: Option<u32>,
        height: Option<u32>,
    ) -> LaunchOptions {
        let safe_id = id.replace([':', '/', '\\'], "_");
        LaunchOptions {
            headless: headless.unwrap_or(self.config.headless),
            width: width.unwrap_or(self.config.viewport_width),
            height: height.unwrap_or(self.config.viewport_height),
            user_data_dir: self.sessions_dir.join(safe_id),
        }
    }

    /// Remove `id` only if its session is still closed; a concurrent caller
    /// may have reopened it since we released the session guard.
    async fn remove_if_closed(&self, id: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(id) {
            let session = entry.session.clone();
            if !session.lock().await.is_open() {
                entries.remove(id);
                debug!(session = id, "removed closed session");
            }
        }
    }
}

fn oldest_key(entries: &HashMap<String, SessionEntry>) -> Option<String> {
    entries
        .iter()
        .min_by_key(|(_, e)| (e.last_activity, e.seq))
        .map(|(id, _)| id.clone())
}

#[cfg(test)]
impl SessionRegistry {
    async fn resident_ids(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        let mut ids: Vec<String> = entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn resident_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    async fn last_activity(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries.lock().await.get(id).map(|e| e.last_activity)
    }

    async fn set_last_activity(&self, id: &str, ts: DateTime<Utc>) {
        if let Some(entry) = self.entries.lock().await.get_mut(id) {
            entry.last_activity = ts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(capacity: usize) -> SessionRegistry {
        let config = BrowserConfig {
            capacity,
            ..BrowserConfig::default()
        };
        SessionRegistry::new(config, std::env::temp_dir().join("webhive-tests"))
    }

    #[tokio::test]
    async fn test_resolve_creates_lazily() {
        let reg = registry(4);
        assert_eq!(reg.resident_count().await, 0);
        let handle = reg.resolve("a").await;
        assert_eq!(reg.resident_count().await, 1);
        assert!(!handle.lock().await.is_open());
    }

    #[tokio::test]
    async fn test_resolve_touches_activity() {
        let reg = registry(4);
        reg.resolve("a").await;
        let first = reg.last_activity("a").await.unwrap();
        reg.resolve("a").await;
        let second = reg.last_activity("a").await.unwrap();
        assert!(second >= first);
        assert_eq!(reg.resident_count().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_never_exceeded() {
        let reg = registry(2);
        for id in ["a", "b", "c", "d", "e"] {
            reg.resolve(id).await;
            assert!(reg.resident_count().await <= 2);
        }
    }

    #[tokio::test]
    async fn test_eviction_picks_least_recently_active() {
        let reg = registry(2);
        reg.resolve("a").await;
        reg.resolve("b").await;
        // "a" is stale, "b" was just touched
        reg.set_last_activity("a", Utc::now() - chrono::Duration::seconds(60))
            .await;
        reg.resolve("c").await;
        assert_eq!(reg.resident_ids().await, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_eviction_tie_breaks_by_insertion_order() {
        let reg = registry(2);
        reg.resolve("a").await;
        reg.resolve("b").await;
        let ts = Utc::now();
        reg.set_last_activity("a", ts).await;
        reg.set_last_activity("b", ts).await;
        reg.resolve("c").await;
        assert_eq!(reg.resident_ids().await, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_scenario_a_b_then_c_evicts_a() {
        let reg = registry(2);
        reg.resolve("a").await;
        reg.resolve("b").await;
        reg.resolve("c").await;
        assert_eq!(reg.resident_ids().await, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_resolving_resident_never_evicts() {
        let reg = registry(2);
        reg.resolve("a").await;
        reg.resolve("b").await;
        reg.resolve("a").await;
        reg.resolve("b").await;
        assert_eq!(reg.resident_ids().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let reg = registry(4);
        reg.resolve("s").await;
        let first = reg.close("s").await.unwrap();
        assert_eq!(first["status"], "closed");
        let second = reg.close("s").await.unwrap();
        assert_eq!(second["status"], "already_closed");
    }

    #[tokio::test]
    async fn test_close_unknown_is_noop() {
        let reg = registry(4);
        let result = reg.close("never-seen").await.unwrap();
        assert_eq!(result["status"], "already_closed");
    }

    #[tokio::test]
    async fn test_list_reports_without_touching_activity() {
        let reg = registry(4);
        reg.resolve("a").await;
        let stale = Utc::now() - chrono::Duration::seconds(120);
        reg.set_last_activity("a", stale).await;
        let listed = reg.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["session"], "a");
        assert_eq!(listed[0]["is_open"], false);
        assert_eq!(listed[0]["tabs"], 0);
        assert!(listed[0]["idle_seconds"].as_i64().unwrap() >= 120);
        assert_eq!(reg.last_activity("a").await.unwrap(), stale);
    }

    #[tokio::test]
    async fn test_create_session_registers_fresh_id() {
        let reg = registry(4);
        let id = reg.create_session().await;
        assert!(reg.resident_ids().await.contains(&id));
    }

    #[tokio::test]
    async fn test_sweep_reaps_stale_session() {
        let reg = registry(4);
        reg.resolve("old").await;
        reg.resolve("fresh").await;
        reg.set_last_activity(
            "old",
            Utc::now() - chrono::Duration::seconds(reg.config.idle_timeout_secs as i64 + 1),
        )
        .await;
        let reaped = reg.sweep_idle().await;
        assert_eq!(reaped, 1);
        assert_eq!(reg.resident_ids().await, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_sweep_spares_recently_touched() {
        let reg = registry(4);
        reg.resolve("s").await;
        reg.set_last_activity("s", Utc::now() - chrono::Duration::seconds(30))
            .await;
        let reaped = reg.sweep_idle().await;
        assert_eq!(reaped, 0);
        assert_eq!(reg.resident_ids().await, vec!["s"]);
    }

    #[tokio::test]
    async fn test_teardown_resets_buffers_and_cursor() {
        let mut session = Session::new("s");
        session.active_index = 3;
        session.console_buffer.lock().await.push(json!({"type": "log"}));
        session.network_buffer.lock().await.push(json!({"url": "x"}));
        session.teardown().await;
        assert!(session.console_buffer.lock().await.is_empty());
        assert!(session.network_buffer.lock().await.is_empty());
        assert_eq!(session.active_index, 0);
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_select_tab_out_of_range_errors() {
        let mut session = Session::new("s");
        let err = session.select_tab(0).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_close_tab_when_closed_errors() {
        let mut session = Session::new("s");
        let err = session.close_tab(None).await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[test]
    fn test_clamp_cursor_holds_invariant() {
        // Scenario B: tabs 0,1,2 with active=2; closing index 1 leaves two
        // tabs with the cursor at 1 — the page formerly at index 2.
        assert_eq!(clamp_cursor(2, 2), 1);
        // Closing the active last tab of two
        assert_eq!(clamp_cursor(1, 1), 0);
        // Cursor still in range: untouched
        assert_eq!(clamp_cursor(0, 2), 0);
        // Empty list parks the cursor at zero
        assert_eq!(clamp_cursor(5, 0), 0);
    }

    #[test]
    fn test_console_entry_joins_args() {
        let params = json!({
            "type": "error",
            "args": [
                {"value": "boom:"},
                {"value": 42},
                {"description": "Object"}
            ],
            "stackTrace": {"callFrames": [{"url": "https://x/app.js", "lineNumber": 7}]}
        });
        let entry = console_entry(&params);
        assert_eq!(entry["type"], "error");
        assert_eq!(entry["text"], "boom: 42 Object");
        assert_eq!(entry["location"]["url"], "https://x/app.js");
        assert_eq!(entry["location"]["line"], 7);
    }

    #[test]
    fn test_console_entry_defaults() {
        let entry = console_entry(&json!({}));
        assert_eq!(entry["type"], "log");
        assert_eq!(entry["text"], "");
        assert_eq!(entry["location"], Value::Null);
    }

    #[test]
    fn test_network_entry_shape() {
        let params = json!({
            "type": "Document",
            "request": {
                "url": "https://example.com/",
                "method": "GET",
                "headers": {"Accept": "text/html"}
            }
        });
        let entry = network_entry(&params);
        assert_eq!(entry["url"], "https://example.com/");
        assert_eq!(entry["method"], "GET");
        assert_eq!(entry["headers"]["Accept"], "text/html");
        assert_eq!(entry["resource_type"], "Document");
    }
}
