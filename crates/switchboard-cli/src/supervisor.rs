//! `start-servers`: run the math and currency SSE servers as child processes

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::cli::Toolset;

const READY_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

struct ManagedServer {
    name: &'static str,
    port: u16,
    child: Child,
}

pub async fn start_servers(config_path: Option<&Path>, host: &str) -> Result<()> {
    let exe = std::env::current_exe().context("Cannot locate the switchboard executable")?;

    let mut servers = Vec::new();
    for toolset in [Toolset::Math, Toolset::Currency] {
        let port = toolset.default_port();
        let mut cmd = Command::new(&exe);
        if let Some(path) = config_path {
            cmd.arg("--config").arg(path);
        }
        cmd.args(["serve-mcp", toolset.name(), "--transport", "sse", "--host", host])
            .arg("--port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start {} server", toolset.name()))?;
        info!(
            "Started {} MCP server (pid {:?}) on port {}",
            toolset.name(),
            child.id(),
            port
        );
        servers.push(ManagedServer {
            name: toolset.name(),
            port,
            child,
        });
    }

    for server in &mut servers {
        if let Err(e) = wait_ready(host, server).await {
            shutdown(&mut servers).await;
            return Err(e);
        }
    }

    println!("All MCP servers are running:");
    for server in &servers {
        println!("  {:<10} http://{}:{}/sse", server.name, host, server.port);
    }
    println!("Press Ctrl+C to stop the servers");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down servers"),
        exited = first_exit(&mut servers) => match exited {
            Ok((name, status)) => warn!("{} server exited with {}", name, status),
            Err(e) => warn!("Lost track of a server process: {}", e),
        },
    }

    shutdown(&mut servers).await;
    Ok(())
}

/// Poll until the server accepts TCP connections
async fn wait_ready(host: &str, server: &mut ManagedServer) -> Result<()> {
    let started = Instant::now();
    loop {
        if let Some(status) = server.child.try_wait()? {
            bail!("{} server exited with {} before becoming ready", server.name, status);
        }
        if TcpStream::connect((host, server.port)).await.is_ok() {
            debug!("{} server ready after {:?}", server.name, started.elapsed());
            return Ok(());
        }
        if started.elapsed() > READY_TIMEOUT {
            bail!(
                "{} server did not accept connections on port {} within {:?}",
                server.name,
                server.port,
                READY_TIMEOUT
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn first_exit(servers: &mut [ManagedServer]) -> Result<(&'static str, ExitStatus)> {
    loop {
        for server in servers.iter_mut() {
            if let Some(status) = server.child.try_wait()? {
                return Ok((server.name, status));
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn shutdown(servers: &mut [ManagedServer]) {
    for server in servers.iter_mut() {
        match server.child.try_wait() {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => debug!("Cannot query {} server: {}", server.name, e),
        }
        match server.child.kill().await {
            Ok(()) => info!("Stopped {} server", server.name),
            Err(e) => warn!("Failed to stop {} server: {}", server.name, e),
        }
    }
}
