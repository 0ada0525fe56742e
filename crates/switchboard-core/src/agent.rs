//! ReAct agent: model reasons, calls tools through a [`ToolInvoker`], repeats
//!
//! Conversation history is kept per thread id, so follow-up questions in the
//! same thread see earlier turns.

use anyhow::{Result, bail};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, mpsc};
use tracing::{debug, info, warn};

use crate::invocation::{ToolCall, ToolInvoker};
use crate::providers::{
    ChatBlock, ChatMessage, ChatMessageContent, ChatResponseBlock, ChatRole, LlmProvider,
};

pub const PROCESSING_MESSAGE: &str = "Processing your request...";
pub const COMPUTING_MESSAGE: &str = "Computing results...";

/// Progress notifications emitted while a query runs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The model asked for tool calls
    Processing { message: String, tools: Vec<String> },
    /// Tool results came back and are being fed to the model
    ToolResults { message: String },
    /// Final answer
    Final { content: String },
}

/// Result of one agent turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentReply {
    pub content: String,
    /// Names of the tools called during this turn, in call order
    pub tool_calls: Vec<String>,
    pub steps: usize,
}

/// Per-thread chat history
#[derive(Default)]
pub struct ConversationStore {
    threads: RwLock<HashMap<String, Vec<ChatMessage>>>,
    turns: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationStore {
    /// Serialize turns on one thread; held from reading history until the reply is stored
    async fn lock_thread(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        let turn = {
            let mut turns = self.turns.lock().await;
            Arc::clone(turns.entry(thread_id.to_string()).or_default())
        };
        turn.lock_owned().await
    }

    pub async fn history(&self, thread_id: &str) -> Vec<ChatMessage> {
        self.threads
            .read()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn replace(&self, thread_id: &str, messages: Vec<ChatMessage>) {
        self.threads
            .write()
            .await
            .insert(thread_id.to_string(), messages);
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

pub struct ReactAgent {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<dyn ToolInvoker>,
    system_prompt: String,
    max_steps: usize,
    memory: ConversationStore,
}

impl ReactAgent {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolInvoker>,
        system_prompt: impl Into<String>,
        max_steps: usize,
    ) -> Self {
        Self {
            provider,
            tools,
            system_prompt: system_prompt.into(),
            max_steps: max_steps.max(1),
            memory: ConversationStore::default(),
        }
    }

    pub fn memory(&self) -> &ConversationStore {
        &self.memory
    }

    pub async fn run(&self, thread_id: &str, query: &str) -> Result<AgentReply> {
        self.run_inner(thread_id, query, None).await
    }

    /// Like [`run`](Self::run) but reports progress on `events`
    pub async fn run_with_events(
        &self,
        thread_id: &str,
        query: &str,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<AgentReply> {
        self.run_inner(thread_id, query, Some(events)).await
    }

    async fn run_inner(
        &self,
        thread_id: &str,
        query: &str,
        events: Option<mpsc::Sender<AgentEvent>>,
    ) -> Result<AgentReply> {
        let emit = |event: AgentEvent| {
            let events = events.clone();
            async move {
                if let Some(tx) = events {
                    // receiver may have gone away; progress is best effort
                    let _ = tx.send(event).await;
                }
            }
        };

        let _turn = self.memory.lock_thread(thread_id).await;
        let mut messages = self.memory.history(thread_id).await;
        messages.push(ChatMessage::user(query));
        let definitions = self.tools.definitions();
        let mut called = Vec::new();

        info!(
            "Agent run thread={} model={} tools={}",
            thread_id,
            self.provider.model(),
            definitions.len()
        );

        for step in 1..=self.max_steps {
            let response = self
                .provider
                .chat(&messages, &definitions, &self.system_prompt)
                .await?;

            if !response.has_tool_calls() {
                let content = response.text();
                messages.push(ChatMessage::assistant(content.clone()));
                self.memory.replace(thread_id, messages).await;
                emit(AgentEvent::Final {
                    content: content.clone(),
                })
                .await;
                debug!("Agent finished thread={} steps={}", thread_id, step);
                return Ok(AgentReply {
                    content,
                    tool_calls: called,
                    steps: step,
                });
            }

            let mut assistant_blocks = Vec::new();
            let mut calls = Vec::new();
            for block in response.blocks {
                match block {
                    ChatResponseBlock::Text { text } => {
                        assistant_blocks.push(ChatBlock::Text { text })
                    }
                    ChatResponseBlock::ToolCall { id, name, input } => {
                        calls.push(ToolCall::with_id(name.clone(), input.clone(), id.clone()));
                        assistant_blocks.push(ChatBlock::ToolCall { id, name, input });
                    }
                }
            }
            messages.push(ChatMessage {
                role: ChatRole::Assistant,
                content: ChatMessageContent::Blocks(assistant_blocks),
            });

            let names: Vec<String> = calls.iter().map(|c| c.tool_name.clone()).collect();
            debug!("Step {} tool calls: {:?}", step, names);
            called.extend(names.iter().cloned());
            emit(AgentEvent::Processing {
                message: PROCESSING_MESSAGE.to_string(),
                tools: names,
            })
            .await;

            let order: Vec<String> = calls.iter().map(|c| c.correlation_id.clone()).collect();
            let mut responses: HashMap<String, _> = self
                .tools
                .invoke_all(calls)
                .await
                .into_iter()
                .map(|r| (r.correlation_id.clone(), r))
                .collect();

            let results = order
                .into_iter()
                .map(|id| match responses.remove(&id) {
                    Some(response) => ChatBlock::ToolResult {
                        content: response.render(),
                        is_error: !response.is_ok(),
                        tool_call_id: id,
                    },
                    None => {
                        warn!("No response for tool call {}", id);
                        ChatBlock::ToolResult {
                            tool_call_id: id,
                            content: "Error: no response".to_string(),
                            is_error: true,
                        }
                    }
                })
                .collect();
            messages.push(ChatMessage {
                role: ChatRole::User,
                content: ChatMessageContent::Blocks(results),
            });
            emit(AgentEvent::ToolResults {
                message: COMPUTING_MESSAGE.to_string(),
            })
            .await;
        }

        warn!(
            "Agent gave up thread={} after {} steps",
            thread_id, self.max_steps
        );
        bail!("Agent exceeded {} reasoning steps", self.max_steps)
    }
}
