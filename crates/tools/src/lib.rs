pub mod browser;
pub mod registry;

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use webhive_core::{Config, Result};

pub use registry::ToolRegistry;

/// Truncate a string to at most `max_bytes`, respecting UTF-8 char boundaries.
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[derive(Clone)]
pub struct ToolContext {
    pub workspace: PathBuf,
    pub config: Config,
}

pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_truncate_short() {
        assert_eq!(safe_truncate("hello", 10), "hello");
    }

    #[test]
    fn test_safe_truncate_cuts() {
        assert_eq!(safe_truncate("hello world", 5), "hello");
    }

    #[test]
    fn test_safe_truncate_utf8_boundary() {
        // "日" is 3 bytes; cutting at 4 must back off to the char boundary
        let s = "日本語";
        assert_eq!(safe_truncate(s, 4), "日");
        assert_eq!(safe_truncate(s, 3), "日");
        assert_eq!(safe_truncate(s, 2), "");
    }
}
