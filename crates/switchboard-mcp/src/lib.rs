//! MCP (Model Context Protocol) support for switchboard
//!
//! Server side exposes a [`ToolRegistry`](switchboard_core::ToolRegistry) over
//! stdio or SSE. Client side reaches back ends through a [`transport::Transport`]
//! and a [`Session`] multiplexes tool calls across all of them.

pub mod adapter;
pub mod client;
pub mod http;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use adapter::McpToolAdapter;
pub use client::McpClient;
pub use http::SseServerHandle;
pub use server::McpServer;
pub use session::Session;
pub use transport::{ResourceGauge, SseTransport, StdioTransport, Transport};
