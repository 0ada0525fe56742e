//! Tool catalog: maps a tool name to how it is reached
//!
//! A session fills its own catalog from the tools each back end advertises.
//! Names are unique per catalog and descriptors never change once registered.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::debug;

use crate::error::{DispatchError, DispatchResult};
use crate::tools::ToolDefinition;

/// How a back end is reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum Endpoint {
    /// Child process speaking newline-delimited JSON-RPC over stdin/stdout
    #[serde(rename = "stdio")]
    LocalProcess {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: Vec<(String, String)>,
    },
    /// Long-lived HTTP event stream
    #[serde(rename = "sse")]
    StreamingNetwork { url: String },
}

impl Endpoint {
    /// Short transport label for logs
    pub fn transport_name(&self) -> &'static str {
        match self {
            Self::LocalProcess { .. } => "stdio",
            Self::StreamingNetwork { .. } => "sse",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalProcess { command, args, .. } if args.is_empty() => {
                write!(f, "stdio:{}", command)
            }
            Self::LocalProcess { command, args, .. } => {
                write!(f, "stdio:{} {}", command, args.join(" "))
            }
            Self::StreamingNetwork { url } => write!(f, "sse:{}", url),
        }
    }
}

/// Everything needed to invoke one tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Name the orchestrator calls the tool by
    pub name: String,
    /// Back end that hosts it
    pub backend: String,
    /// Name the back end knows it by
    pub remote_name: String,
    pub description: String,
    pub input_schema: Value,
    pub endpoint: Endpoint,
}

impl ToolDescriptor {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// Name → descriptor map with unique names
#[derive(Debug, Default)]
pub struct ToolCatalog {
    entries: HashMap<String, Arc<ToolDescriptor>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Fails if the name is taken; the existing entry is kept.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> DispatchResult<()> {
        match self.entries.entry(descriptor.name.clone()) {
            Entry::Occupied(existing) => Err(DispatchError::DuplicateName(
                existing.key().clone(),
            )),
            Entry::Vacant(slot) => {
                debug!(
                    "Cataloged tool {} -> {} ({})",
                    descriptor.name, descriptor.backend, descriptor.endpoint
                );
                slot.insert(Arc::new(descriptor));
                Ok(())
            }
        }
    }

    /// Look up a descriptor by tool name
    pub fn resolve(&self, name: &str) -> DispatchResult<Arc<ToolDescriptor>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tool names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Model-facing definitions, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.entries.values().map(|d| d.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Descriptors hosted by one back end
    pub fn for_backend(&self, backend: &str) -> Vec<Arc<ToolDescriptor>> {
        let mut found: Vec<Arc<ToolDescriptor>> = self
            .entries
            .values()
            .filter(|d| d.backend == backend)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}
