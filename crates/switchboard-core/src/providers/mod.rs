//! LLM provider abstraction
//!
//! The agent talks to models through [`LlmProvider`]. Google Gemini is the
//! bundled implementation.

pub mod google;
pub mod types;

pub use google::GeminiProvider;
pub use types::{
    ChatBlock, ChatMessage, ChatMessageContent, ChatResponse, ChatResponseBlock, ChatRole,
    ChatUsage, LlmProvider, StopReason,
};
