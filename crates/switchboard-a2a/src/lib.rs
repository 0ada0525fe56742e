//! A2A (Agent-to-Agent) protocol support for switchboard
//!
//! JSON-RPC task exchange between agents. The server hosts any
//! [`TaskHandler`] (normally the ReAct agent); the client sends tasks to peers
//! and [`A2aAgentTool`] turns a peer into a tool another agent can call.

pub mod client;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod tool;

pub use client::A2aClient;
pub use handler::{AgentTaskHandler, default_agent_card};
pub use protocol::{AgentCard, AgentSkill, Message, Part, Task, TaskState, TaskStatus};
pub use server::{A2aServer, A2aServerHandle, TaskHandler};
pub use tool::{A2aAgentTool, default_peers, peer_registry};
