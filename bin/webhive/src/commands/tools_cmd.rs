use serde_json::Value;
use std::sync::Arc;

use webhive_core::{BrowserConfig, Paths};
use webhive_tools::browser::SessionRegistry;
use webhive_tools::ToolRegistry;

fn registry() -> ToolRegistry {
    let paths = Paths::new();
    let sessions = Arc::new(SessionRegistry::new(
        BrowserConfig::default(),
        paths.sessions_dir(),
    ));
    ToolRegistry::with_defaults(sessions)
}

fn schema_function(schema: &Value) -> &Value {
    schema.get("function").unwrap_or(schema)
}

/// List all registered tools.
pub fn list() -> anyhow::Result<()> {
    let schemas = registry().get_tool_schemas();

    println!();
    println!("Registered tools ({} total)", schemas.len());
    println!();
    for schema in &schemas {
        let func = schema_function(schema);
        let name = func["name"].as_str().unwrap_or("");
        let desc = func["description"].as_str().unwrap_or("");
        let short: String = desc.chars().take(72).collect();
        let ellipsis = if desc.chars().count() > 72 { "..." } else { "" };
        println!("  {:<12} {}{}", name, short, ellipsis);
    }
    println!();
    Ok(())
}

/// Show detailed info for a specific tool.
pub fn info(tool_name: &str) -> anyhow::Result<()> {
    let schemas = registry().get_tool_schemas();
    let schema = schemas
        .iter()
        .find(|s| schema_function(s)["name"].as_str() == Some(tool_name));

    match schema {
        Some(schema) => {
            let func = schema_function(schema);
            println!();
            println!("{}", func["name"].as_str().unwrap_or(""));
            println!();
            println!("{}", func["description"].as_str().unwrap_or(""));
            println!();
            println!("Parameters:");
            println!("{}", serde_json::to_string_pretty(&func["parameters"])?);
            Ok(())
        }
        None => anyhow::bail!(
            "Tool '{}' not found. Use `webhive tools list` to see available tools.",
            tool_name
        ),
    }
}
