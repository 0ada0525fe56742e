//! Subcommand implementations

use anyhow::{Context, Result, bail};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use switchboard_a2a::{
    A2aClient, A2aServer, AgentTaskHandler, default_agent_card, default_peers, peer_registry,
};
use switchboard_core::config::BackendConfig;
use switchboard_core::providers::GeminiProvider;
use switchboard_core::tools::{FrankfurterRates, ToolRegistry, currency, math};
use switchboard_core::{AgentEvent, ReactAgent, SwitchboardConfig, ToolCall};
use switchboard_mcp::{McpServer, McpToolAdapter, Session, SseServerHandle};

use crate::cli::{ServeTransport, Toolset};

/// Local registry backing one MCP toolset
pub fn toolset_registry(toolset: Toolset, config: &SwitchboardConfig) -> Result<ToolRegistry> {
    Ok(match toolset {
        Toolset::Math => math::registry(),
        Toolset::Currency => {
            currency::registry(Arc::new(FrankfurterRates::new(&config.currency.api_url)?))
        }
        Toolset::Peers => {
            let peers = if config.a2a.peers.is_empty() {
                default_peers()
            } else {
                config.a2a.peers.clone()
            };
            peer_registry(&peers)?
        }
    })
}

/// Configured back ends, else this binary's own math and currency servers over stdio
pub fn resolve_backends(
    config: &SwitchboardConfig,
    config_path: Option<&Path>,
) -> Result<Vec<BackendConfig>> {
    if !config.backends.is_empty() {
        return Ok(config.backends.clone());
    }
    let exe = std::env::current_exe().context("Cannot locate the switchboard executable")?;
    let exe = exe.to_string_lossy();
    let config_arg = config_path.map(|p| p.to_string_lossy().into_owned());

    Ok([Toolset::Math, Toolset::Currency]
        .into_iter()
        .map(|toolset| {
            let mut args: Vec<&str> = vec![];
            if let Some(path) = &config_arg {
                args.extend(["--config", path.as_str()]);
            }
            args.extend(["serve-mcp", toolset.name()]);
            BackendConfig::stdio(toolset.name(), &exe, &args)
        })
        .collect())
}

fn build_agent(config: &SwitchboardConfig, session: Arc<Session>) -> Result<ReactAgent> {
    let provider = GeminiProvider::new(
        config.agent.resolve_api_key()?,
        config.agent.model.clone(),
        config.agent.max_tokens,
    )?;
    Ok(ReactAgent::new(
        Arc::new(provider),
        session,
        config.agent.system_prompt.clone(),
        config.agent.max_steps,
    ))
}

pub async fn serve_mcp(
    config: &SwitchboardConfig,
    toolset: Toolset,
    transport: ServeTransport,
    host: &str,
    port: Option<u16>,
) -> Result<()> {
    let registry = toolset_registry(toolset, config)?;
    let server = Arc::new(McpServer::new(
        toolset.name(),
        McpToolAdapter::new(Arc::new(registry)),
    ));

    match transport {
        ServeTransport::Stdio => server.serve_stdio().await,
        ServeTransport::Sse => {
            let addr = format!("{}:{}", host, port.unwrap_or(toolset.default_port()));
            let handle = SseServerHandle::bind(server, &addr).await?;
            let shutdown = handle.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C, shutting down");
                    shutdown.cancel();
                }
            });
            handle.wait().await
        }
    }
}

pub async fn serve_a2a(
    config: &SwitchboardConfig,
    backends: &[BackendConfig],
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let host = host.unwrap_or_else(|| config.a2a.host.clone());
    let port = port.unwrap_or(config.a2a.port);

    let session = Arc::new(Session::open(&config.dispatch, backends).await?);
    let agent = match build_agent(config, Arc::clone(&session)) {
        Ok(agent) => Arc::new(agent),
        Err(e) => {
            session.close().await;
            return Err(e);
        }
    };

    let card = default_agent_card(&format!("http://{}:{}/", host, port));
    let server = Arc::new(A2aServer::new(card, Arc::new(AgentTaskHandler::new(agent))));
    let result = match server.bind(&format!("{}:{}", host, port)).await {
        Ok(handle) => {
            tokio::select! {
                res = handle.wait() => res,
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C, shutting down");
                    Ok(())
                }
            }
        }
        Err(e) => Err(e),
    };
    session.close().await;
    result
}

pub async fn ask(
    config: &SwitchboardConfig,
    backends: &[BackendConfig],
    query: String,
    verbose: bool,
) -> Result<()> {
    let config = config.clone();
    let dispatch = config.dispatch.clone();
    Session::scoped(&dispatch, backends, move |session| async move {
        let agent = build_agent(&config, session)?;
        let thread_id = uuid::Uuid::new_v4().to_string();

        let reply = if verbose {
            let (tx, mut rx) = mpsc::channel(16);
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        AgentEvent::Processing { message, tools } => {
                            eprintln!("{} ({})", message, tools.join(", "))
                        }
                        AgentEvent::ToolResults { message } => eprintln!("{}", message),
                        AgentEvent::Final { .. } => {}
                    }
                }
            });
            let reply = agent.run_with_events(&thread_id, &query, tx).await;
            let _ = printer.await;
            reply?
        } else {
            agent.run(&thread_id, &query).await?
        };

        println!("{}", reply.content);
        Ok(())
    })
    .await
}

pub async fn chat(config: &SwitchboardConfig, backends: &[BackendConfig]) -> Result<()> {
    let config = config.clone();
    let dispatch = config.dispatch.clone();
    Session::scoped(&dispatch, backends, move |session| async move {
        let tools = session.catalog().names().join(", ");
        let agent = build_agent(&config, session)?;
        let thread_id = uuid::Uuid::new_v4().to_string();

        println!("Math & currency assistant. Tools: {}", tools);
        println!("Type 'exit', 'quit' or 'q' to leave.");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if matches!(line.to_lowercase().as_str(), "exit" | "quit" | "q") {
                break;
            }
            match agent.run(&thread_id, line).await {
                Ok(reply) => println!("{}\n", reply.content),
                Err(e) => {
                    warn!("Agent turn failed: {:#}", e);
                    println!("Error: {}\n", e);
                }
            }
        }
        Ok(())
    })
    .await
}

pub async fn list_tools(config: &SwitchboardConfig, backends: &[BackendConfig]) -> Result<()> {
    Session::scoped(&config.dispatch, backends, |session| async move {
        for name in session.catalog().names() {
            let descriptor = session.catalog().resolve(&name)?;
            println!(
                "{:<20} [{} via {}] {}",
                descriptor.name,
                descriptor.backend,
                descriptor.endpoint.transport_name(),
                descriptor.description
            );
        }
        Ok(())
    })
    .await
}

pub async fn call_tool(
    config: &SwitchboardConfig,
    backends: &[BackendConfig],
    tool: String,
    args: &str,
) -> Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    if !arguments.is_object() {
        bail!("--args must be a JSON object");
    }

    let response = Session::scoped(&config.dispatch, backends, |session| async move {
        Ok(session.call(ToolCall::new(tool, arguments)).await)
    })
    .await?;

    println!("{}", serde_json::to_string_pretty(&response.to_envelope())?);
    if !response.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

pub async fn send_task(url: &str, session: Option<String>, query: &str) -> Result<()> {
    let client = A2aClient::new()?;
    let session_id = session.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let reply = client.ask(url, &session_id, query).await?;
    println!("{}", reply);
    Ok(())
}
