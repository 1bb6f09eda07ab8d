//! Chrome DevTools Protocol connection over WebSocket.
//!
//! One `CdpConnection` speaks to one debugger target (normally a page).
//! Commands are correlated to responses by id; protocol events fan out to
//! subscribers. This is the consumed driver capability: the session layer
//! never interprets results beyond forwarding them.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use webhive_core::{Error, Result};

/// Upper bound on any single driver command; page loads can be slow but not unbounded.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;
type ListenerMap = Arc<Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>>;

pub struct CdpConnection {
    out_tx: mpsc::Sender<String>,
    pending: PendingMap,
    listeners: ListenerMap,
    next_id: AtomicU64,
    reader: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
}

impl CdpConnection {
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Driver(format!("connect to {}: {}", ws_url, e)))?;
        let (mut sink, mut source) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(msg)).await {
                    warn!("CDP write failed: {}", e);
                    break;
                }
            }
        });

        let pending_rx = pending.clone();
        let listeners_rx = listeners.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => {
                        debug!("CDP socket closed by browser");
                        break;
                    }
                    Err(e) => {
                        debug!("CDP read ended: {}", e);
                        break;
                    }
                    _ => continue,
                };
                let Ok(msg) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                if let Some(id) = msg.get("id").and_then(Value::as_u64) {
                    if let Some(tx) = pending_rx.lock().await.remove(&id) {
                        let _ = tx.send(msg);
                    }
                } else if let Some(method) = msg.get("method").and_then(Value::as_str) {
                    let guard = listeners_rx.lock().await;
                    if let Some(subs) = guard.get(method) {
                        let params = msg.get("params").cloned().unwrap_or(Value::Null);
                        for tx in subs {
                            let _ = tx.try_send(params.clone());
                        }
                    }
                }
            }
        });

        Ok(Self {
            out_tx,
            pending,
            listeners,
            next_id: AtomicU64::new(1),
            reader,
            writer,
        })
    }

    /// Send a command and wait for its response. Protocol errors and timeouts
    /// surface as `Error::Driver` / `Error::Timeout`.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = json!({"id": id, "method": method, "params": params});

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        self.out_tx
            .send(frame.to_string())
            .await
            .map_err(|_| Error::Driver(format!("{}: connection closed", method)))?;

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => {
                if let Some(err) = response.get("error") {
                    Err(Error::Driver(format!("{}: {}", method, err)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Driver(format!("{}: connection closed", method))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!(
                    "{} did not answer within {}s",
                    method,
                    COMMAND_TIMEOUT.as_secs()
                )))
            }
        }
    }

    /// Subscribe to a protocol event (e.g. `Runtime.consoleAPICalled`).
    /// The receiver yields the event's `params` object.
    pub async fn subscribe(&self, method: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(64);
        self.listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Enable the protocol domains the action surface depends on.
    pub async fn enable_page_domains(&self) -> Result<()> {
        for domain in ["Page", "Runtime", "DOM", "Network", "Accessibility"] {
            self.send(&format!("{}.enable", domain), json!({})).await?;
        }
        // Target is not available on every browser build
        let _ = self.send("Target.enable", json!({})).await;
        Ok(())
    }

    // ─── Page actions ─────────────────────────────────────────────────

    pub async fn navigate(&self, url: &str) -> Result<Value> {
        self.send("Page.navigate", json!({"url": url})).await
    }

    /// Evaluate an expression; returns the raw `Runtime.evaluate` result.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.send(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await
    }

    /// Evaluate an expression and extract the plain value, if any.
    pub async fn eval_value(&self, expression: &str) -> Result<Value> {
        let result = self.evaluate(expression).await?;
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Capture a screenshot; returns base64-encoded PNG data.
    pub async fn capture_screenshot(&self, full_page: bool) -> Result<String> {
        let mut params = json!({"format": "png"});
        if full_page {
            params["captureBeyondViewport"] = json!(true);
        }
        let result = self.send("Page.captureScreenshot", params).await?;
        result
            .get("data")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Driver("screenshot returned no data".into()))
    }

    pub async fn ax_tree(&self) -> Result<Value> {
        self.send("Accessibility.getFullAXTree", json!({})).await
    }

    pub async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.send(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": 1.0,
                "mobile": false,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn handle_dialog(&self, accept: bool, prompt_text: Option<&str>) -> Result<()> {
        let mut params = json!({"accept": accept});
        if let Some(text) = prompt_text {
            params["promptText"] = json!(text);
        }
        self.send("Page.handleJavaScriptDialog", params).await?;
        Ok(())
    }

    // ─── DOM resolution ───────────────────────────────────────────────

    pub async fn document_root(&self) -> Result<i64> {
        let doc = self.send("DOM.getDocument", json!({"depth": 0})).await?;
        doc.get("root")
            .and_then(|r| r.get("nodeId"))
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::Driver("document has no root node".into()))
    }

    pub async fn query_selector(&self, selector: &str) -> Result<Option<i64>> {
        let root = self.document_root().await?;
        let result = self
            .send(
                "DOM.querySelector",
                json!({"nodeId": root, "selector": selector}),
            )
            .await?;
        Ok(result
            .get("nodeId")
            .and_then(Value::as_i64)
            .filter(|id| *id != 0))
    }

    pub async fn resolve_node(&self, node_id: i64) -> Result<String> {
        let result = self
            .send("DOM.resolveNode", json!({"nodeId": node_id}))
            .await?;
        object_id(&result)
    }

    pub async fn resolve_backend_node(&self, backend_node_id: i64) -> Result<String> {
        let result = self
            .send("DOM.resolveNode", json!({"backendNodeId": backend_node_id}))
            .await?;
        object_id(&result)
    }

    pub async fn focus_backend_node(&self, backend_node_id: i64) -> Result<()> {
        self.send("DOM.focus", json!({"backendNodeId": backend_node_id}))
            .await?;
        Ok(())
    }

    /// Element content-box corner coordinates, if the node is rendered.
    pub async fn box_model(&self, backend_node_id: i64) -> Result<Value> {
        self.send("DOM.getBoxModel", json!({"backendNodeId": backend_node_id}))
            .await
    }

    pub async fn call_function_on(&self, object_id: &str, declaration: &str) -> Result<Value> {
        self.send(
            "Runtime.callFunctionOn",
            json!({
                "objectId": object_id,
                "functionDeclaration": declaration,
                "returnByValue": true,
            }),
        )
        .await
    }

    // ─── Input ────────────────────────────────────────────────────────

    pub async fn mouse_event(
        &self,
        kind: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: u32,
    ) -> Result<()> {
        self.send(
            "Input.dispatchMouseEvent",
            json!({
                "type": kind,
                "x": x,
                "y": y,
                "button": button,
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn key_event(&self, kind: &str, key: &str, code: &str, modifiers: u32) -> Result<()> {
        let mut params = json!({"type": kind, "key": key, "code": code});
        if modifiers != 0 {
            params["modifiers"] = json!(modifiers);
        }
        if kind == "keyDown" && key.chars().count() == 1 {
            params["text"] = json!(key);
        }
        self.send("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    pub async fn insert_text(&self, text: &str) -> Result<()> {
        self.send("Input.insertText", json!({"text": text})).await?;
        Ok(())
    }

    // ─── Targets (tabs) ───────────────────────────────────────────────

    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result = self.send("Target.createTarget", json!({"url": url})).await?;
        result
            .get("targetId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Driver("createTarget returned no targetId".into()))
    }

    pub async fn close_target(&self, target_id: &str) -> Result<()> {
        self.send("Target.closeTarget", json!({"targetId": target_id}))
            .await?;
        Ok(())
    }

    // ─── File upload ──────────────────────────────────────────────────

    pub async fn set_file_input(&self, backend_node_id: i64, files: &[String]) -> Result<()> {
        self.send(
            "DOM.setFileInputFiles",
            json!({"files": files, "backendNodeId": backend_node_id}),
        )
        .await?;
        Ok(())
    }

    pub async fn set_file_input_by_object(&self, object_id: &str, files: &[String]) -> Result<()> {
        self.send(
            "DOM.setFileInputFiles",
            json!({"files": files, "objectId": object_id}),
        )
        .await?;
        Ok(())
    }
}

fn object_id(resolve_result: &Value) -> Result<String> {
    resolve_result
        .get("object")
        .and_then(|o| o.get("objectId"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Driver("node did not resolve to an object".into()))
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
