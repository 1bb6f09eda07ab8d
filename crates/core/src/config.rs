use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Browser session limits and driver launch defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Maximum number of concurrently resident sessions.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Seconds of inactivity after which a session is eligible for reaping.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Seconds between idle-reaper sweeps.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
}

fn default_capacity() -> usize {
    10
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_reap_interval_secs() -> u64 {
    300
}

fn default_headless() -> bool {
    true
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            headless: default_headless(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.browser.capacity, 10);
        assert_eq!(config.browser.idle_timeout_secs, 1800);
        assert_eq!(config.browser.reap_interval_secs, 300);
        assert!(config.browser.headless);
        assert_eq!(config.browser.viewport_width, 1280);
        assert_eq!(config.browser.viewport_height, 720);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"browser": {"capacity": 3, "headless": false}}"#).unwrap();
        assert_eq!(config.browser.capacity, 3);
        assert!(!config.browser.headless);
        assert_eq!(config.browser.idle_timeout_secs, 1800);
        assert_eq!(config.browser.viewport_width, 1280);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.browser.capacity, 10);
    }

    #[test]
    fn test_roundtrip() {
        let mut config = Config::default();
        config.browser.capacity = 5;
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.browser.capacity, 5);
    }
}
