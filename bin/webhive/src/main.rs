mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "webhive")]
#[command(about = "Multi-session browser automation tool server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tool invocations over stdin/stdout (one JSON object per line)
    Serve,

    /// Manage registered tools
    Tools {
        #[command(subcommand)]
        command: ToolsCommands,
    },

    /// Execute a tool directly
    Run {
        /// Tool name (e.g. "browse")
        tool: String,

        /// Tool parameters as a JSON object
        #[arg(default_value = "{}")]
        params: String,
    },

    /// Run environment diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum ToolsCommands {
    /// List all registered tools
    List,
    /// Show the full schema for a tool
    Info {
        /// Tool name
        tool_name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve => {
            commands::serve::run().await?;
        }
        Commands::Tools { command } => match command {
            ToolsCommands::List => {
                commands::tools_cmd::list()?;
            }
            ToolsCommands::Info { tool_name } => {
                commands::tools_cmd::info(&tool_name)?;
            }
        },
        Commands::Run { tool, params } => {
            commands::run_cmd::tool(&tool, &params).await?;
        }
        Commands::Doctor => {
            commands::doctor::run()?;
        }
    }

    Ok(())
}
