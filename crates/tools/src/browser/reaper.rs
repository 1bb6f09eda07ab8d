//! Background sweep that ages out inactive sessions.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use super::session::SessionRegistry;

/// Spawn the idle reaper. Runs until aborted; each cycle tears down every
/// session idle beyond the registry's timeout. Teardown failures are logged
/// inside the sweep and never abort the loop.
pub fn spawn(registry: Arc<SessionRegistry>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval() fires immediately; the first sweep should wait a full period
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let reaped = registry.sweep_idle().await;
            if reaped > 0 {
                info!(reaped, "idle sweep complete");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use webhive_core::BrowserConfig;

    #[tokio::test]
    async fn test_reaper_task_spawns_and_aborts() {
        let config = BrowserConfig::default();
        let registry = Arc::new(SessionRegistry::new(
            config,
            std::env::temp_dir().join("webhive-tests"),
        ));
        let handle = spawn(registry, Duration::from_secs(3600));
        assert!(!handle.is_finished());
        handle.abort();
    }
}
