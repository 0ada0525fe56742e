//! switchboard: MCP and A2A tool servers plus a ReAct agent that uses them

mod cli;
mod commands;
mod supervisor;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use switchboard_core::SwitchboardConfig;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries MCP framing under `serve-mcp`, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let config = SwitchboardConfig::load(config_path)?;

    match cli.command {
        Commands::ServeMcp {
            toolset,
            transport,
            host,
            port,
        } => commands::serve_mcp(&config, toolset, transport, &host, port).await,
        Commands::ServeA2a { host, port } => {
            let backends = commands::resolve_backends(&config, config_path)?;
            commands::serve_a2a(&config, &backends, host, port).await
        }
        Commands::Ask { query, verbose } => {
            let backends = commands::resolve_backends(&config, config_path)?;
            commands::ask(&config, &backends, query, verbose).await
        }
        Commands::Chat => {
            let backends = commands::resolve_backends(&config, config_path)?;
            commands::chat(&config, &backends).await
        }
        Commands::Tools => {
            let backends = commands::resolve_backends(&config, config_path)?;
            commands::list_tools(&config, &backends).await
        }
        Commands::Call { tool, args } => {
            let backends = commands::resolve_backends(&config, config_path)?;
            commands::call_tool(&config, &backends, tool, &args).await
        }
        Commands::SendTask {
            url,
            session,
            query,
        } => commands::send_task(&url, session, &query).await,
        Commands::StartServers { host } => supervisor::start_servers(config_path, &host).await,
    }
}
