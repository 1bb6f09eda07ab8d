//! Long-running dispatch loop: one JSON request per stdin line, one JSON
//! response per stdout line. The idle reaper runs alongside for the lifetime
//! of the process.
//!
//! Request shape: `{"tool": "browse", "params": {...}}`. A line without a
//! `tool` key is treated as params for `browse`.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use webhive_core::{Config, Paths};
use webhive_tools::browser::{reaper, SessionRegistry};
use webhive_tools::{ToolContext, ToolRegistry};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    std::fs::create_dir_all(paths.workspace())?;

    let sessions = Arc::new(SessionRegistry::new(
        config.browser.clone(),
        paths.sessions_dir(),
    ));
    let registry = ToolRegistry::with_defaults(sessions.clone());
    let reaper_task = reaper::spawn(sessions.clone(), sessions.reap_interval());

    info!(
        capacity = config.browser.capacity,
        idle_timeout_secs = config.browser.idle_timeout_secs,
        reap_interval_secs = config.browser.reap_interval_secs,
        "webhive serving on stdin/stdout"
    );

    let ctx = ToolContext {
        workspace: paths.workspace(),
        config,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = dispatch(&registry, ctx.clone(), line).await;
        println!("{}", response);
    }

    info!("stdin closed, shutting down");
    reaper_task.abort();
    sessions.close_all().await;
    Ok(())
}

/// Every failure is recovered here into a response value; a bad request or a
/// failed driver call never takes the process down.
async fn dispatch(registry: &ToolRegistry, ctx: ToolContext, line: &str) -> String {
    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return json!({"ok": false, "error": format!("invalid request: {}", e)}).to_string()
        }
    };

    let (tool, params) = match request.get("tool").and_then(Value::as_str) {
        Some(tool) => (
            tool.to_string(),
            request.get("params").cloned().unwrap_or(json!({})),
        ),
        None => ("browse".to_string(), request),
    };

    match registry.execute(&tool, ctx, params).await {
        Ok(result) => json!({"ok": true, "result": result}).to_string(),
        Err(e) => json!({"ok": false, "error": e.to_string()}).to_string(),
    }
}
