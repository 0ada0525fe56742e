use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "switchboard",
    version,
    about = "Route a ReAct agent's tool calls across MCP and A2A servers"
)]
pub struct Cli {
    /// Config file (default: ~/.switchboard/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toolset {
    Math,
    Currency,
    Peers,
}

impl Toolset {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Math => "math",
            Self::Currency => "currency",
            Self::Peers => "peers",
        }
    }

    /// SSE port used when none is given
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Math => 8002,
            Self::Currency => 8001,
            Self::Peers => 8003,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServeTransport {
    Stdio,
    Sse,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Serve a toolset as an MCP server")]
    ServeMcp {
        #[arg(value_enum)]
        toolset: Toolset,
        #[arg(long, value_enum, default_value_t = ServeTransport::Stdio)]
        transport: ServeTransport,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long)]
        port: Option<u16>,
    },
    #[command(about = "Serve the agent over A2A")]
    ServeA2a {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    #[command(about = "Ask the agent one question")]
    Ask {
        query: String,
        /// Print progress events to stderr
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
    #[command(about = "Interactive conversation with the agent")]
    Chat,
    #[command(about = "List tools discovered from the configured back ends")]
    Tools,
    #[command(about = "Call one tool directly and print the response envelope")]
    Call {
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    #[command(about = "Send a task to an A2A agent and print its reply")]
    SendTask {
        #[arg(long)]
        url: String,
        #[arg(long)]
        session: Option<String>,
        query: String,
    },
    #[command(about = "Run the math and currency SSE servers until Ctrl-C")]
    StartServers {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}
