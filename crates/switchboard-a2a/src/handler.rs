//! ReAct agent behind the A2A server

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use switchboard_core::ReactAgent;

use crate::protocol::{AgentCapabilities, AgentCard, AgentSkill};
use crate::server::TaskHandler;

/// Runs each task through the agent, one conversation per A2A session
pub struct AgentTaskHandler {
    agent: Arc<ReactAgent>,
}

impl AgentTaskHandler {
    pub fn new(agent: Arc<ReactAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl TaskHandler for AgentTaskHandler {
    async fn handle(&self, session_id: &str, query: &str) -> Result<String> {
        let reply = self.agent.run(session_id, query).await?;
        debug!(
            "Agent answered session {} in {} steps ({} tool calls)",
            session_id,
            reply.steps,
            reply.tool_calls.len()
        );
        Ok(reply.content)
    }
}

/// Card for the math and currency agent served at `url`
pub fn default_agent_card(url: &str) -> AgentCard {
    AgentCard {
        name: "Math & Currency Agent".to_string(),
        description: "Helps with arithmetic and currency conversions".to_string(),
        url: url.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        capabilities: AgentCapabilities::default(),
        default_input_modes: vec!["text".to_string()],
        default_output_modes: vec!["text".to_string()],
        skills: vec![
            AgentSkill {
                id: "math_operations".to_string(),
                name: "Math Operations".to_string(),
                description: "Adds and multiplies numbers".to_string(),
                tags: vec!["math".to_string(), "arithmetic".to_string()],
                examples: vec!["What is 3 + 5?".to_string(), "Multiply 6 by 7".to_string()],
            },
            AgentSkill {
                id: "currency_conversion".to_string(),
                name: "Currency Conversion".to_string(),
                description: "Looks up exchange rates and converts amounts".to_string(),
                tags: vec!["currency".to_string(), "exchange rates".to_string()],
                examples: vec![
                    "What is the exchange rate between USD and EUR?".to_string(),
                    "Convert 100 USD to JPY".to_string(),
                ],
            },
        ],
    }
}
