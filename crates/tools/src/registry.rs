use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use webhive_core::{Error, Result};

use crate::browser::{BrowseTool, SessionRegistry};
use crate::{Tool, ToolContext};

#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry with the built-in tools, sharing the given session registry
    /// (the serve loop also hands it to the idle reaper).
    pub fn with_defaults(sessions: Arc<SessionRegistry>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BrowseTool::new(sessions)));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = schema.name, "registering tool");
        self.tools.insert(schema.name.to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn get_tool_schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                let schema = tool.schema();
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.parameters
                    }
                })
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, ctx: ToolContext, params: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::Tool(format!("Unknown tool: {}", name)))?;

        if let Err(e) = tool.validate(&params) {
            warn!(tool = name, error = %e, "tool validation failed");
            return Err(e);
        }

        debug!(tool = name, "executing tool");
        tool.execute(ctx, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webhive_core::BrowserConfig;

    fn sessions() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(
            BrowserConfig::default(),
            std::env::temp_dir().join("webhive-tests"),
        ))
    }

    #[test]
    fn test_registry_new_empty() {
        let reg = ToolRegistry::new();
        assert!(reg.tool_names().is_empty());
        assert!(reg.get("browse").is_none());
    }

    #[test]
    fn test_registry_with_defaults_has_browse() {
        let reg = ToolRegistry::with_defaults(sessions());
        assert!(reg.get("browse").is_some());
        assert_eq!(reg.tool_names(), vec!["browse".to_string()]);
    }

    #[test]
    fn test_registry_schemas_shape() {
        let reg = ToolRegistry::with_defaults(sessions());
        let schemas = reg.get_tool_schemas();
        assert_eq!(schemas.len(), 1);
        for schema in &schemas {
            assert_eq!(schema["type"], "function");
            assert!(schema["function"]["name"].is_string());
            assert!(schema["function"]["description"].is_string());
        }
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_errors() {
        let reg = ToolRegistry::with_defaults(sessions());
        let ctx = ToolContext {
            workspace: std::env::temp_dir(),
            config: webhive_core::Config::default(),
        };
        let err = reg.execute("no_such_tool", ctx, json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Tool(_)));
    }
}
