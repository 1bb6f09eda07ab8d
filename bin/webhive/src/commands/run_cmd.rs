use serde_json::Value;
use std::sync::Arc;

use webhive_core::{Config, Paths};
use webhive_tools::browser::SessionRegistry;
use webhive_tools::{ToolContext, ToolRegistry};

/// Run a single tool call and print the result. Sessions opened here die
/// with the process; use `serve` for anything stateful.
pub async fn tool(tool_name: &str, params_json: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    std::fs::create_dir_all(paths.workspace())?;

    let sessions = Arc::new(SessionRegistry::new(
        config.browser.clone(),
        paths.sessions_dir(),
    ));
    let registry = ToolRegistry::with_defaults(sessions.clone());

    let tool = registry.get(tool_name).ok_or_else(|| {
        anyhow::anyhow!(
            "Tool '{}' not found. Use `webhive tools list` to see available tools.",
            tool_name
        )
    })?;

    let params: Value = serde_json::from_str(params_json)
        .map_err(|e| anyhow::anyhow!("Failed to parse JSON params: {}\nInput: {}", e, params_json))?;

    if let Err(e) = tool.validate(&params) {
        anyhow::bail!(
            "Parameter validation failed: {}\nUse `webhive tools info {}` for parameter details.",
            e,
            tool_name
        );
    }

    let ctx = ToolContext {
        workspace: paths.workspace(),
        config,
    };

    let result = tool.execute(ctx, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    sessions.close_all().await;
    Ok(())
}
