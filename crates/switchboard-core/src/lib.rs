//! switchboard-core: shared building blocks
//!
//! Error taxonomy for tool dispatch, the local tool registry and the
//! name → descriptor catalog, invocation envelopes, the math and currency
//! toolsets, LLM provider abstraction and the ReAct agent loop.

pub mod agent;
pub mod catalog;
pub mod config;
pub mod error;
pub mod invocation;
pub mod providers;
pub mod tools;

pub use agent::{AgentEvent, AgentReply, ReactAgent};
pub use catalog::{Endpoint, ToolCatalog, ToolDescriptor};
pub use config::SwitchboardConfig;
pub use error::{DispatchError, DispatchResult};
pub use invocation::{ToolCall, ToolInvoker, ToolResponse};
pub use tools::{ToolDefinition, ToolHandler, ToolRegistry};
