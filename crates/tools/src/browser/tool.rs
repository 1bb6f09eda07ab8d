//! BrowseTool — browser automation over isolated per-session browsers.
//!
//! Every handler is a thin pass-through: resolve the session, borrow its
//! active page, forward one driver call, shape the result. The session
//! registry does the heavy lifting.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use webhive_core::{Error, Result};

use crate::{safe_truncate, Tool, ToolContext, ToolSchema};

use super::session::{Session, SessionRegistry, DEFAULT_SESSION};
use super::snapshot;

pub struct BrowseTool {
    sessions: Arc<SessionRegistry>,
}

impl BrowseTool {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self { sessions }
    }

    /// The registry behind this tool; the serve loop hands it to the reaper.
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }
}

#[async_trait]
impl Tool for BrowseTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "browse",
            description: "Browser automation with isolated per-client sessions. Supports \
                accessibility snapshots with element refs (@e1, @e2...), navigation, clicking, \
                typing, tabs with an active-tab cursor, screenshots, rendered-markup capture, \
                and per-session console/network logs.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": [
                            "open", "close", "session_list", "session_new",
                            "tab_list", "tab_new", "tab_close", "tab_select",
                            "navigate", "back", "resize",
                            "click", "hover", "type", "press_key", "select_option",
                            "drag", "upload_file", "wait",
                            "screenshot", "snapshot", "markup", "evaluate", "dialog",
                            "console_messages", "network_requests"
                        ],
                        "description": "Browser action: 'open'/'close'=session browser lifecycle; \
                            'session_list'/'session_new'=session management; 'navigate'=open URL \
                            (requires url); 'snapshot'=accessibility tree with refs; 'markup'=page \
                            HTML as markdown; 'click'/'hover'/'type'=element interaction (ref or \
                            selector); 'tab_*'=tab management; 'console_messages'/'network_requests'=\
                            captured per-session events. Defaults to 'navigate' when url is given, \
                            'snapshot' otherwise."
                    },
                    "session": {
                        "type": "string",
                        "description": "Session id (default: 'default'). Each session is an isolated browser."
                    },
                    "url": { "type": "string", "description": "URL for 'navigate'" },
                    "ref": {
                        "type": "string",
                        "description": "Element ref from a snapshot (e.g. 'e3') for click/hover/type/select_option/upload_file"
                    },
                    "selector": {
                        "type": "string",
                        "description": "CSS selector (fallback when no ref is available)"
                    },
                    "text": {
                        "type": "string",
                        "description": "Text to type, or JS expression for 'evaluate', or text to wait for"
                    },
                    "key": { "type": "string", "description": "Key for 'press_key' (e.g. 'Enter', 'Ctrl+A')" },
                    "index": { "type": "integer", "description": "Tab index for tab_close/tab_select" },
                    "headless": { "type": "boolean", "description": "For 'open': launch headless (default from config)" },
                    "width": { "type": "integer", "description": "Viewport width for 'open'/'resize'" },
                    "height": { "type": "integer", "description": "Viewport height for 'open'/'resize'" },
                    "double": { "type": "boolean", "description": "For 'click': double-click (default false)" },
                    "button": {
                        "type": "string",
                        "enum": ["left", "right", "middle"],
                        "description": "Mouse button for 'click' (default 'left')"
                    },
                    "slowly": { "type": "boolean", "description": "For 'type': dispatch per-character key events" },
                    "submit": { "type": "boolean", "description": "For 'type': press Enter afterwards" },
                    "values": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Values for 'select_option'"
                    },
                    "start_ref": { "type": "string", "description": "Drag source ref" },
                    "start_selector": { "type": "string", "description": "Drag source selector" },
                    "end_ref": { "type": "string", "description": "Drag target ref" },
                    "end_selector": { "type": "string", "description": "Drag target selector" },
                    "files": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Absolute file paths for 'upload_file'; empty cancels the pending chooser"
                    },
                    "time": { "type": "number", "description": "Seconds to wait (for 'wait')" },
                    "text_gone": { "type": "string", "description": "For 'wait': text that should disappear" },
                    "timeout": { "type": "integer", "description": "Wait timeout in ms (default 5000)" },
                    "full_page": { "type": "boolean", "description": "For 'screenshot': capture beyond the viewport" },
                    "output_path": { "type": "string", "description": "Extra copy destination for 'screenshot'" },
                    "compact": { "type": "boolean", "description": "For 'snapshot': elide empty structural nodes (default true)" },
                    "max_length": { "type": "integer", "description": "For 'markup': truncation limit in bytes (default 50000)" },
                    "accept": { "type": "boolean", "description": "For 'dialog': accept or dismiss (default true)" },
                    "prompt_text": { "type": "string", "description": "For 'dialog': text for a prompt dialog" },
                    "only_errors": { "type": "boolean", "description": "For 'console_messages': errors only" }
                },
                "required": []
            }),
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value> {
        let action = params["action"].as_str().unwrap_or_else(|| {
            if params.get("url").and_then(Value::as_str).is_some() {
                "navigate"
            } else {
                "snapshot"
            }
        });
        let sid = params["session"]
            .as_str()
            .unwrap_or(DEFAULT_SESSION)
            .to_string();

        let result = match action {
            // ─── Session lifecycle ────────────────────────────────────
            "open" => {
                self.sessions
                    .open(
                        &sid,
                        params["headless"].as_bool(),
                        params["width"].as_u64().map(|v| v as u32),
                        params["height"].as_u64().map(|v| v as u32),
                    )
                    .await
            }
            "close" => self.sessions.close(&sid).await,
            "session_list" => {
                let sessions = self.sessions.list().await;
                Ok(json!({"count": sessions.len(), "sessions": sessions}))
            }
            "session_new" => {
                let id = self.sessions.create_session().await;
                Ok(json!({"status": "session_created", "session": id}))
            }

            // ─── Tabs ─────────────────────────────────────────────────
            "tab_list" => self.sessions.list_tabs(&sid).await,
            "tab_new" => self.sessions.create_tab(&sid).await,
            "tab_close" => {
                let index = params["index"].as_u64().map(|v| v as usize);
                self.sessions.close_tab(&sid, index).await
            }
            "tab_select" => match params["index"].as_u64() {
                Some(index) => self.sessions.select_tab(&sid, index as usize).await,
                None => Err(Error::Tool("tab_select requires 'index'".into())),
            },

            // ─── Captured events ──────────────────────────────────────
            "console_messages" => {
                let handle = self.sessions.resolve(&sid).await;
                let session = handle.lock().await;
                let buffer = session.console_buffer.lock().await;
                let messages: Vec<Value> = if params["only_errors"].as_bool().unwrap_or(false) {
                    buffer
                        .iter()
                        .filter(|m| m["type"] == "error")
                        .cloned()
                        .collect()
                } else {
                    buffer.clone()
                };
                Ok(json!({"count": messages.len(), "messages": messages}))
            }
            "network_requests" => {
                let handle = self.sessions.resolve(&sid).await;
                let session = handle.lock().await;
                let buffer = session.network_buffer.lock().await;
                Ok(json!({"count": buffer.len(), "requests": buffer.clone()}))
            }

            // ─── Page actions (auto-open the browser if needed) ───────
            "navigate" | "back" | "resize" | "click" | "hover" | "type" | "press_key"
            | "select_option" | "drag" | "upload_file" | "wait" | "screenshot" | "snapshot"
            | "markup" | "evaluate" | "dialog" => match self.sessions.ensure_open(&sid).await {
                Err(e) => Err(e),
                Ok(handle) => {
                    let mut session = handle.lock().await;
                    match action {
                        "navigate" => action_navigate(&mut session, &params).await,
                        "back" => action_back(&mut session).await,
                        "resize" => action_resize(&session, &params).await,
                        "click" => action_click(&mut session, &params).await,
                        "hover" => action_hover(&mut session, &params).await,
                        "type" => action_type(&mut session, &params).await,
                        "press_key" => action_press_key(&mut session, &params).await,
                        "select_option" => action_select_option(&session, &params).await,
                        "drag" => action_drag(&mut session, &params).await,
                        "upload_file" => action_upload_file(&session, &params).await,
                        "wait" => action_wait(&session, &params).await,
                        "screenshot" => action_screenshot(&session, &params, &ctx.workspace).await,
                        "snapshot" => {
                            let compact = params["compact"].as_bool().unwrap_or(true);
                            refresh_snapshot(&mut session, compact).await
                        }
                        "markup" => action_markup(&session, &params).await,
                        "evaluate" => action_evaluate(&session, &params).await,
                        "dialog" => action_dialog(&session, &params).await,
                        _ => unreachable!("page action list is exhaustive"),
                    }
                }
            },

            _ => Err(Error::Tool(format!("unknown browse action: {}", action))),
        };

        result.map_err(|e| annotate(action, &sid, e))
    }
}

/// Driver failures keep enough context to retry: which action, which session.
fn annotate(action: &str, session: &str, e: Error) -> Error {
    match e {
        Error::Driver(msg) => Error::Driver(format!(
            "{} failed for session '{}': {}",
            action, session, msg
        )),
        Error::Timeout(msg) => Error::Timeout(format!(
            "{} timed out for session '{}': {}",
            action, session, msg
        )),
        other => other,
    }
}

// ─── Element targeting ────────────────────────────────────────────────

enum Target {
    Ref(String),
    Selector(String),
}

fn resolve_target(params: &Value, prefix: &str) -> Result<Target> {
    let ref_key = format!("{}ref", prefix);
    let selector_key = format!("{}selector", prefix);
    if let Some(r) = params[ref_key.as_str()].as_str() {
        Ok(Target::Ref(r.trim_start_matches('@').to_string()))
    } else if let Some(s) = params[selector_key.as_str()].as_str() {
        Ok(Target::Selector(s.to_string()))
    } else {
        Err(Error::Tool(format!(
            "action requires '{}' (from a snapshot) or '{}' (CSS)",
            ref_key, selector_key
        )))
    }
}

fn backend_node_for_ref(session: &Session, ref_id: &str) -> Result<i64> {
    session
        .refs
        .get(ref_id)
        .and_then(|v| v["backendNodeId"].as_i64())
        .ok_or_else(|| {
            Error::NotFound(format!(
                "ref '{}' not known in session '{}'; take a snapshot first",
                ref_id, session.id
            ))
        })
}

fn active(session: &Session) -> Result<&super::session::PageHandle> {
    session
        .active_page()
        .ok_or_else(|| Error::Session(format!("session '{}' has no pages", session.id)))
}

fn js_quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// JS that scrolls a selector into view and returns its center point.
fn center_js(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector('{}'); if (!el) return null; \
         el.scrollIntoView({{block: 'center'}}); const r = el.getBoundingClientRect(); \
         return {{x: r.x + r.width / 2, y: r.y + r.height / 2}}; }})()",
        js_quote(selector)
    )
}

/// Center point of an element, by ref (box model) or selector (client rect).
async fn target_center(session: &Session, target: &Target) -> Result<(f64, f64)> {
    let page = active(session)?;
    match target {
        Target::Ref(ref_id) => {
            let backend_id = backend_node_for_ref(session, ref_id)?;
            let model = page.cdp.box_model(backend_id).await?;
            box_center(&model)
                .ok_or_else(|| Error::Driver(format!("ref '{}' has no box model", ref_id)))
        }
        Target::Selector(selector) => {
            let point = page.cdp.eval_value(&center_js(selector)).await?;
            match (point["x"].as_f64(), point["y"].as_f64()) {
                (Some(x), Some(y)) => Ok((x, y)),
                _ => Err(Error::NotFound(format!("element not found: {}", selector))),
            }
        }
    }
}

/// Center of a CDP box model's content quad.
fn box_center(model: &Value) -> Option<(f64, f64)> {
    let quad = model.get("model")?.get("content")?.as_array()?;
    if quad.len() < 8 {
        return None;
    }
    let x1 = quad[0].as_f64()?;
    let y1 = quad[1].as_f64()?;
    let x2 = quad[4].as_f64()?;
    let y2 = quad[5].as_f64()?;
    Some(((x1 + x2) / 2.0, (y1 + y2) / 2.0))
}

async fn focus_target(session: &Session, target: &Target) -> Result<()> {
    let page = active(session)?;
    match target {
        Target::Ref(ref_id) => {
            let backend_id = backend_node_for_ref(session, ref_id)?;
            page.cdp.focus_backend_node(backend_id).await
        }
        Target::Selector(selector) => {
            let js = format!(
                "(() => {{ const el = document.querySelector('{}'); if (!el) return false; \
                 el.focus(); return true; }})()",
                js_quote(selector)
            );
            match page.cdp.eval_value(&js).await?.as_bool() {
                Some(true) => Ok(()),
                _ => Err(Error::NotFound(format!("element not found: {}", selector))),
            }
        }
    }
}

/// Let the page react before we report or re-snapshot.
async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Re-render the accessibility snapshot and refresh the session's ref map.
async fn refresh_snapshot(session: &mut Session, compact: bool) -> Result<Value> {
    let (text, refs, url, title) = {
        let page = active(session)?;
        let tree = page.cdp.ax_tree().await?;
        let (text, refs) = snapshot::render(&tree, compact);
        let url = page
            .cdp
            .eval_value("window.location.href")
            .await
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        let title = page
            .cdp
            .eval_value("document.title")
            .await
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        (text, refs, url, title)
    };
    let ref_count = refs.len();
    session.refs = refs;
    Ok(json!({
        "url": url,
        "title": title,
        "snapshot": text,
        "ref_count": ref_count,
    }))
}

// ─── Action handlers ──────────────────────────────────────────────────

async fn action_navigate(session: &mut Session, params: &Value) -> Result<Value> {
    let url = params["url"]
        .as_str()
        .ok_or_else(|| Error::Tool("navigate requires 'url'".into()))?
        .to_string();
    active(session)?.cdp.navigate(&url).await?;
    settle(1000).await;
    let mut result = refresh_snapshot(session, true).await?;
    result["status"] = json!("navigated");
    Ok(result)
}

async fn action_back(session: &mut Session) -> Result<Value> {
    active(session)?.cdp.eval_value("history.back()").await?;
    settle(500).await;
    let mut result = refresh_snapshot(session, true).await?;
    result["status"] = json!("navigated_back");
    Ok(result)
}

async fn action_resize(session: &Session, params: &Value) -> Result<Value> {
    let width = params["width"].as_u64().unwrap_or(1280) as u32;
    let height = params["height"].as_u64().unwrap_or(720) as u32;
    active(session)?.cdp.set_viewport(width, height).await?;
    Ok(json!({"status": "resized", "width": width, "height": height}))
}

async fn action_click(session: &mut Session, params: &Value) -> Result<Value> {
    let target = resolve_target(params, "")?;
    let button = params["button"].as_str().unwrap_or("left").to_string();
    let click_count = if params["double"].as_bool().unwrap_or(false) {
        2
    } else {
        1
    };

    match &target {
        Target::Ref(_) => {
            let (x, y) = target_center(session, &target).await?;
            let page = active(session)?;
            page.cdp.mouse_event("mousePressed", x, y, &button, click_count).await?;
            page.cdp.mouse_event("mouseReleased", x, y, &button, click_count).await?;
        }
        Target::Selector(selector) => {
            // Left single clicks go through the element directly; anything
            // fancier needs coordinates.
            if button == "left" && click_count == 1 {
                let js = format!(
                    "(() => {{ const el = document.querySelector('{}'); if (!el) return false; \
                     el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
                    js_quote(selector)
                );
                let page = active(session)?;
                match page.cdp.eval_value(&js).await?.as_bool() {
                    Some(true) => {}
                    _ => return Err(Error::NotFound(format!("element not found: {}", selector))),
                }
            } else {
                let (x, y) = target_center(session, &target).await?;
                let page = active(session)?;
                page.cdp.mouse_event("mousePressed", x, y, &button, click_count).await?;
                page.cdp.mouse_event("mouseReleased", x, y, &button, click_count).await?;
            }
        }
    }

    settle(500).await;
    let mut result = refresh_snapshot(session, true).await?;
    result["status"] = json!("clicked");
    Ok(result)
}

async fn action_hover(session: &mut Session, params: &Value) -> Result<Value> {
    let target = resolve_target(params, "")?;
    let (x, y) = target_center(session, &target).await?;
    active(session)?
        .cdp
        .mouse_event("mouseMoved", x, y, "none", 0)
        .await?;
    settle(300).await;
    let mut result = refresh_snapshot(session, true).await?;
    result["status"] = json!("hovered");
    Ok(result)
}

async fn action_type(session: &mut Session, params: &Value) -> Result<Value> {
    let text = params["text"]
        .as_str()
        .ok_or_else(|| Error::Tool("type requires 'text'".into()))?
        .to_string();
    let slowly = params["slowly"].as_bool().unwrap_or(false);
    let submit = params["submit"].as_bool().unwrap_or(false);

    if let Ok(target) = resolve_target(params, "") {
        focus_target(session, &target).await?;
    }

    {
        let page = active(session)?;
        if slowly {
            for ch in text.chars() {
                let key = ch.to_string();
                page.cdp.key_event("keyDown", &key, "", 0).await?;
                page.cdp.key_event("keyUp", &key, "", 0).await?;
            }
        } else {
            // Clear whatever the field held, insert, and nudge frameworks
            page.cdp
                .eval_value(
                    "(() => { const el = document.activeElement; if (el) { \
                     if ('value' in el) el.value = ''; else el.textContent = ''; } })()",
                )
                .await?;
            page.cdp.insert_text(&text).await?;
            page.cdp
                .eval_value(
                    "document.activeElement && document.activeElement.dispatchEvent(\
                     new Event('input', {bubbles: true}))",
                )
                .await?;
        }
        if submit {
            page.cdp.key_event("keyDown", "Enter", "Enter", 0).await?;
            page.cdp.key_event("keyUp", "Enter", "Enter", 0).await?;
        }
    }

    settle(300).await;
    let mut result = refresh_snapshot(session, true).await?;
    result["status"] = json!(if submit { "typed_and_submitted" } else { "typed" });
    Ok(result)
}

async fn action_press_key(session: &mut Session, params: &Value) -> Result<Value> {
    let spec = params["key"]
        .as_str()
        .ok_or_else(|| Error::Tool("press_key requires 'key'".into()))?;
    let (key, code, modifiers) = parse_key_spec(spec);
    {
        let page = active(session)?;
        page.cdp.key_event("keyDown", &key, &code, modifiers).await?;
        page.cdp.key_event("keyUp", &key, &code, modifiers).await?;
    }
    settle(300).await;
    let mut result = refresh_snapshot(session, true).await?;
    result["status"] = json!("key_pressed");
    result["key"] = json!(spec);
    Ok(result)
}

async fn action_select_option(session: &Session, params: &Value) -> Result<Value> {
    let values: Vec<String> = params["values"]
        .as_array()
        .ok_or_else(|| Error::Tool("select_option requires 'values'".into()))?
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    let values_json = serde_json::to_string(&values)?;
    let target = resolve_target(params, "")?;
    let page = active(session)?;

    let select_body = format!(
        "const values = {}; \
         for (const opt of el.options) opt.selected = values.includes(opt.value); \
         el.dispatchEvent(new Event('input', {{bubbles: true}})); \
         el.dispatchEvent(new Event('change', {{bubbles: true}})); \
         return true;",
        values_json
    );

    match &target {
        Target::Ref(ref_id) => {
            let backend_id = backend_node_for_ref(session, ref_id)?;
            let object_id = page.cdp.resolve_backend_node(backend_id).await?;
            page.cdp
                .call_function_on(
                    &object_id,
                    &format!("function() {{ const el = this; {} }}", select_body),
                )
                .await?;
        }
        Target::Selector(selector) => {
            let js = format!(
                "(() => {{ const el = document.querySelector('{}'); if (!el) return false; {} }})()",
                js_quote(selector),
                select_body
            );
            match page.cdp.eval_value(&js).await?.as_bool() {
                Some(true) => {}
                _ => return Err(Error::NotFound(format!("element not found: {}", selector))),
            }
        }
    }

    Ok(json!({"status": "option_selected", "values": values}))
}

async fn action_drag(session: &mut Session, params: &Value) -> Result<Value> {
    let source = resolve_target(params, "start_")?;
    let dest = resolve_target(params, "end_")?;
    let (sx, sy) = target_center(session, &source).await?;
    let (ex, ey) = target_center(session, &dest).await?;

    {
        let page = active(session)?;
        page.cdp.mouse_event("mousePressed", sx, sy, "left", 1).await?;
        page.cdp
            .mouse_event("mouseMoved", (sx + ex) / 2.0, (sy + ey) / 2.0, "left", 0)
            .await?;
        page.cdp.mouse_event("mouseMoved", ex, ey, "left", 0).await?;
        page.cdp.mouse_event("mouseReleased", ex, ey, "left", 1).await?;
    }

    settle(500).await;
    let mut result = refresh_snapshot(session, true).await?;
    result["status"] = json!("dragged");
    Ok(result)
}

async fn action_upload_file(session: &Session, params: &Value) -> Result<Value> {
    let files: Vec<String> = params["files"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();
    for file in &files {
        if !Path::new(file).exists() {
            return Err(Error::NotFound(format!("file not found: {}", file)));
        }
    }

    let target = resolve_target(params, "")?;
    let page = active(session)?;
    match &target {
        Target::Ref(ref_id) => {
            let backend_id = backend_node_for_ref(session, ref_id)?;
            page.cdp.set_file_input(backend_id, &files).await?;
        }
        Target::Selector(selector) => {
            let node_id = page
                .cdp
                .query_selector(selector)
                .await?
                .ok_or_else(|| Error::NotFound(format!("file input not found: {}", selector)))?;
            let object_id = page.cdp.resolve_node(node_id).await?;
            page.cdp.set_file_input_by_object(&object_id, &files).await?;
        }
    }

    page.cdp
        .eval_value(
            "document.activeElement && document.activeElement.dispatchEvent(\
             new Event('change', {bubbles: true}))",
        )
        .await?;

    if files.is_empty() {
        Ok(json!({"status": "upload_cancelled"}))
    } else {
        Ok(json!({"status": "files_uploaded", "count": files.len(), "files": files}))
    }
}

async fn action_wait(session: &Session, params: &Value) -> Result<Value> {
    let page = active(session)?;
    let timeout_ms = params["timeout"].as_u64().unwrap_or(5000);

    if let Some(seconds) = params["time"].as_f64() {
        settle((seconds * 1000.0) as u64).await;
        return Ok(json!({"status": "waited", "seconds": seconds}));
    }

    let (label, probe) = if let Some(selector) = params["selector"].as_str() {
        (
            selector.to_string(),
            format!("!!document.querySelector('{}')", js_quote(selector)),
        )
    } else if let Some(text) = params["text"].as_str() {
        (
            text.to_string(),
            format!(
                "document.body && document.body.innerText.includes('{}')",
                js_quote(text)
            ),
        )
    } else if let Some(text) = params["text_gone"].as_str() {
        (
            text.to_string(),
            format!(
                "!(document.body && document.body.innerText.includes('{}'))",
                js_quote(text)
            ),
        )
    } else {
        return Err(Error::Tool(
            "wait requires 'time', 'selector', 'text', or 'text_gone'".into(),
        ));
    };

    let start = std::time::Instant::now();
    loop {
        if page.cdp.eval_value(&probe).await?.as_bool() == Some(true) {
            return Ok(json!({
                "status": "condition_met",
                "condition": label,
                "waited_ms": start.elapsed().as_millis() as u64,
            }));
        }
        if start.elapsed() > Duration::from_millis(timeout_ms) {
            return Ok(json!({
                "status": "timeout",
                "condition": label,
                "waited_ms": timeout_ms,
            }));
        }
        settle(200).await;
    }
}

async fn action_screenshot(
    session: &Session,
    params: &Value,
    workspace: &Path,
) -> Result<Value> {
    let full_page = params["full_page"].as_bool().unwrap_or(false);
    let encoded = active(session)?.cdp.capture_screenshot(full_page).await?;

    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&encoded)
        .map_err(|e| Error::Driver(format!("screenshot payload decode: {}", e)))?;

    let media_dir = workspace.join("media");
    std::fs::create_dir_all(&media_dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let safe_id = session.id.replace([':', '/', '\\'], "_");
    let path = media_dir.join(format!("screenshot_{}_{}.png", safe_id, stamp));
    std::fs::write(&path, &bytes)?;

    let mut result = json!({
        "status": "screenshot_saved",
        "path": path.display().to_string(),
        "size_bytes": bytes.len(),
    });

    if let Some(user_path) = params["output_path"].as_str() {
        let expanded = if let Some(rest) = user_path.strip_prefix("~/") {
            dirs::home_dir()
                .map(|h| h.join(rest))
                .unwrap_or_else(|| user_path.into())
        } else {
            user_path.into()
        };
        if let Some(parent) = expanded.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        if std::fs::write(&expanded, &bytes).is_ok() {
            result["also_saved_to"] = json!(expanded.display().to_string());
        }
    }

    Ok(result)
}

async fn action_markup(session: &Session, params: &Value) -> Result<Value> {
    let page = active(session)?;
    let max_length = params["max_length"].as_u64().unwrap_or(50_000) as usize;

    let js = match params["selector"].as_str() {
        Some(selector) => format!(
            "(() => {{ const el = document.querySelector('{}'); \
             return el ? el.outerHTML : null; }})()",
            js_quote(selector)
        ),
        None => "document.documentElement.outerHTML".to_string(),
    };
    let html = page
        .cdp
        .eval_value(&js)
        .await?
        .as_str()
        .map(String::from)
        .ok_or_else(|| {
            Error::NotFound(format!(
                "element not found: {}",
                params["selector"].as_str().unwrap_or("document")
            ))
        })?;

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript", "iframe"])
        .build();
    let markdown = converter
        .convert(&html)
        .map_err(|e| Error::Tool(format!("markdown conversion: {}", e)))?;

    let total = markdown.len();
    let body = if total > max_length {
        format!(
            "{}\n\n... [truncated, {} total bytes]",
            safe_truncate(&markdown, max_length),
            total
        )
    } else {
        markdown
    };

    Ok(json!({
        "format": "markdown",
        "length": total,
        "content": body,
    }))
}

async fn action_evaluate(session: &Session, params: &Value) -> Result<Value> {
    let expression = params["text"]
        .as_str()
        .ok_or_else(|| Error::Tool("evaluate requires 'text' (a JS expression)".into()))?;
    let result = active(session)?.cdp.evaluate(expression).await?;

    if let Some(exception) = result
        .get("exceptionDetails")
        .and_then(|e| e.get("text"))
        .and_then(Value::as_str)
    {
        return Ok(json!({"status": "exception", "error": exception}));
    }
    let value = result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null);
    Ok(json!({"status": "ok", "result": value}))
}

async fn action_dialog(session: &Session, params: &Value) -> Result<Value> {
    let accept = params["accept"].as_bool().unwrap_or(true);
    let prompt_text = params["prompt_text"].as_str();
    active(session)?.cdp.handle_dialog(accept, prompt_text).await?;
    Ok(json!({
        "status": if accept { "dialog_accepted" } else { "dialog_dismissed" },
    }))
}

/// Parse a key spec like "Enter", "Ctrl+A", or "Ctrl+Shift+Tab" into
/// (key, code, CDP modifier bits).
fn parse_key_spec(spec: &str) -> (String, String, u32) {
    let parts: Vec<&str> = spec.split('+').collect();
    let mut modifiers = 0u32;
    let mut key = spec.to_string();

    if parts.len() > 1 {
        for part in &parts[..parts.len() - 1] {
            match part.to_ascii_lowercase().as_str() {
                "alt" | "option" => modifiers |= 1,
                "ctrl" | "control" => modifiers |= 2,
                "meta" | "cmd" | "command" => modifiers |= 4,
                "shift" => modifiers |= 8,
                _ => {}
            }
        }
        key = parts.last().unwrap_or(&spec).to_string();
    }

    let code = match key.as_str() {
        "Enter" | "Return" => "Enter".to_string(),
        "Tab" => "Tab".to_string(),
        "Escape" | "Esc" => "Escape".to_string(),
        "Backspace" => "Backspace".to_string(),
        "Delete" => "Delete".to_string(),
        "ArrowUp" | "Up" => "ArrowUp".to_string(),
        "ArrowDown" | "Down" => "ArrowDown".to_string(),
        "ArrowLeft" | "Left" => "ArrowLeft".to_string(),
        "ArrowRight" | "Right" => "ArrowRight".to_string(),
        "Home" => "Home".to_string(),
        "End" => "End".to_string(),
        "PageUp" => "PageUp".to_string(),
        "PageDown" => "PageDown".to_string(),
        " " | "Space" => "Space".to_string(),
        other if other.chars().count() == 1 => {
            format!("Key{}", other.to_uppercase())
        }
        other => other.to_string(),
    };

    (key, code, modifiers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_name_and_actions() {
        let registry = Arc::new(SessionRegistry::new(
            webhive_core::BrowserConfig::default(),
            std::env::temp_dir().join("webhive-tests"),
        ));
        let tool = BrowseTool::new(registry);
        let schema = tool.schema();
        assert_eq!(schema.name, "browse");

        let actions = schema.parameters["properties"]["action"]["enum"]
            .as_array()
            .unwrap();
        let names: Vec<&str> = actions.iter().filter_map(Value::as_str).collect();
        for expected in [
            "open",
            "close",
            "session_list",
            "session_new",
            "tab_list",
            "tab_new",
            "tab_close",
            "tab_select",
            "navigate",
            "back",
            "resize",
            "click",
            "hover",
            "type",
            "press_key",
            "select_option",
            "drag",
            "upload_file",
            "wait",
            "screenshot",
            "snapshot",
            "markup",
            "evaluate",
            "dialog",
            "console_messages",
            "network_requests",
        ] {
            assert!(names.contains(&expected), "missing action {}", expected);
        }
    }

    #[test]
    fn test_resolve_target_prefers_ref() {
        let params = json!({"ref": "@e5", "selector": "#x"});
        match resolve_target(&params, "").unwrap() {
            Target::Ref(r) => assert_eq!(r, "e5"),
            _ => panic!("expected ref"),
        }
    }

    #[test]
    fn test_resolve_target_prefixed() {
        let params = json!({"start_selector": ".card", "end_ref": "e2"});
        match resolve_target(&params, "start_").unwrap() {
            Target::Selector(s) => assert_eq!(s, ".card"),
            _ => panic!("expected selector"),
        }
        match resolve_target(&params, "end_").unwrap() {
            Target::Ref(r) => assert_eq!(r, "e2"),
            _ => panic!("expected ref"),
        }
    }

    #[test]
    fn test_resolve_target_missing_errors() {
        assert!(resolve_target(&json!({}), "").is_err());
    }

    #[test]
    fn test_parse_key_spec_plain() {
        let (key, code, modifiers) = parse_key_spec("Enter");
        assert_eq!(key, "Enter");
        assert_eq!(code, "Enter");
        assert_eq!(modifiers, 0);
    }

    #[test]
    fn test_parse_key_spec_single_char() {
        let (key, code, modifiers) = parse_key_spec("a");
        assert_eq!(key, "a");
        assert_eq!(code, "KeyA");
        assert_eq!(modifiers, 0);
    }

    #[test]
    fn test_parse_key_spec_combo() {
        let (key, code, modifiers) = parse_key_spec("Ctrl+Shift+Tab");
        assert_eq!(key, "Tab");
        assert_eq!(code, "Tab");
        assert_eq!(modifiers, 10);
    }

    #[test]
    fn test_box_center() {
        let model = json!({
            "model": {"content": [10.0, 20.0, 110.0, 20.0, 110.0, 60.0, 10.0, 60.0]}
        });
        let (x, y) = box_center(&model).unwrap();
        assert!((x - 60.0).abs() < f64::EPSILON);
        assert!((y - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_box_center_malformed() {
        assert!(box_center(&json!({})).is_none());
        assert!(box_center(&json!({"model": {"content": [1.0, 2.0]}})).is_none());
    }

    #[test]
    fn test_js_quote() {
        assert_eq!(js_quote("a'b\\c"), "a\\'b\\\\c");
    }
}
