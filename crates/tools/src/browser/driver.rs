//! Browser process lifecycle: discovery, launch, readiness, teardown.
//!
//! The registry owns exactly one `DriverHandle` per open session; every other
//! interaction with the browser goes through per-target `CdpConnection`s.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use webhive_core::{Error, Result};

/// How long to wait for a freshly spawned browser to expose its CDP endpoint.
const READY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    pub user_data_dir: PathBuf,
}

/// Exclusive ownership of one browser process.
pub struct DriverHandle {
    process: Child,
    pub debug_port: u16,
    pub user_data_dir: PathBuf,
}

impl DriverHandle {
    /// Kill the browser process. Graceful `Browser.close` is attempted by the
    /// session teardown before this; here we only reap what is left.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.process.kill().await {
            debug!("browser process kill failed (may have exited): {}", e);
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        let _ = self.process.start_kill();
    }
}

/// Spawn a browser and wait until its debugging endpoint answers.
pub async fn launch(opts: &LaunchOptions) -> Result<DriverHandle> {
    let binary = find_browser_binary()
        .ok_or_else(|| Error::Driver("no Chrome/Chromium/Edge binary found".into()))?;

    std::fs::create_dir_all(&opts.user_data_dir)
        .map_err(|e| Error::Driver(format!("create user data dir: {}", e)))?;

    let debug_port = free_port().await?;
    let args = launch_args(debug_port, opts);

    info!(
        binary = %binary,
        port = debug_port,
        headless = opts.headless,
        "launching browser"
    );

    let process = Command::new(&binary)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Driver(format!("spawn {}: {}", binary, e)))?;

    let handle = DriverHandle {
        process,
        debug_port,
        user_data_dir: opts.user_data_dir.clone(),
    };

    // If readiness fails the handle drops here and the process is reaped.
    wait_until_ready(debug_port).await?;
    Ok(handle)
}

fn launch_args(debug_port: u16, opts: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", opts.user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
    ];
    if opts.headless {
        args.push("--headless=new".to_string());
    }
    args.push(format!("--window-size={},{}", opts.width, opts.height));
    args.push("about:blank".to_string());
    args
}

/// Find a Chromium-family binary on the system.
pub fn find_browser_binary() -> Option<String> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "microsoft-edge",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

async fn free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::Driver(format!("probe for free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::Driver(format!("read probe addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll `/json/version` until the endpoint answers.
async fn wait_until_ready(port: u16) -> Result<()> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let start = std::time::Instant::now();

    loop {
        if start.elapsed() > READY_TIMEOUT {
            return Err(Error::Timeout(format!(
                "browser CDP endpoint not ready after {}s on port {}",
                READY_TIMEOUT.as_secs(),
                port
            )));
        }
        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if body.get("webSocketDebuggerUrl").is_some() {
                    return Ok(());
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// WebSocket URL of the first page target. Retries while the initial tab
/// is still materializing.
pub async fn first_page_ws_url(port: u16) -> Result<(String, String)> {
    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        for target in list_targets(port).await.unwrap_or_default() {
            if target.get("type").and_then(Value::as_str) == Some("page") {
                if let (Some(id), Some(ws)) = (
                    target.get("id").and_then(Value::as_str),
                    target.get("webSocketDebuggerUrl").and_then(Value::as_str),
                ) {
                    return Ok((id.to_string(), ws.to_string()));
                }
            }
        }
    }
    Err(Error::Driver("no page target appeared after launch".into()))
}

/// WebSocket URL for a specific target id.
pub async fn target_ws_url(port: u16, target_id: &str) -> Result<String> {
    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        for target in list_targets(port).await.unwrap_or_default() {
            if target.get("id").and_then(Value::as_str) == Some(target_id) {
                if let Some(ws) = target.get("webSocketDebuggerUrl").and_then(Value::as_str) {
                    return Ok(ws.to_string());
                }
            }
        }
    }
    Err(Error::Driver(format!(
        "no WebSocket URL for target '{}'",
        target_id
    )))
}

async fn list_targets(port: u16) -> Result<Vec<Value>> {
    let url = format!("http://127.0.0.1:{}/json/list", port);
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| Error::Driver(format!("list targets: {}", e)))?;
    resp.json()
        .await
        .map_err(|e| Error::Driver(format!("parse target list: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_args_headless() {
        let opts = LaunchOptions {
            headless: true,
            width: 1280,
            height: 720,
            user_data_dir: PathBuf::from("/tmp/webhive-test"),
        };
        let args = launch_args(9222, &opts);
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--window-size=1280,720".to_string()));
        assert_eq!(args.last().unwrap(), "about:blank");
    }

    #[test]
    fn test_launch_args_headed() {
        let opts = LaunchOptions {
            headless: false,
            width: 800,
            height: 600,
            user_data_dir: PathBuf::from("/tmp/webhive-test"),
        };
        let args = launch_args(9000, &opts);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(args.contains(&"--window-size=800,600".to_string()));
    }
}
