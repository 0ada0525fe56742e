//! Error taxonomy for tool dispatch

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced for a single tool invocation or transport operation.
///
/// Every variant maps to a stable [`kind`](DispatchError::kind) string that is
/// carried in the wire-level response envelope.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The transport to a back end could not be established or was lost.
    #[error("Connection to '{backend}' failed: {reason}")]
    Connection {
        backend: String,
        reason: String,
        /// Set when the back end is likely just not ready yet.
        retryable: bool,
    },

    /// Malformed or out-of-order framing. The transport is terminated.
    #[error("Protocol error on '{backend}': {reason}")]
    Protocol { backend: String, reason: String },

    /// No response arrived within the deadline.
    #[error("'{operation}' timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    /// Registry miss.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A tool with this name is already registered.
    #[error("Tool already registered: {0}")]
    DuplicateName(String),

    /// The tool itself reported a failure.
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },
}

/// Convenience result type for dispatch operations
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

impl DispatchError {
    /// Connection failure that will not go away by retrying
    pub fn connection(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            backend: backend.into(),
            reason: reason.into(),
            retryable: false,
        }
    }

    /// Back end not ready yet (refused, closed during handshake, slow start)
    pub fn not_ready(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            backend: backend.into(),
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn protocol(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn tool_failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection_error",
            Self::Protocol { .. } => "protocol_error",
            Self::Timeout { .. } => "timeout_error",
            Self::UnknownTool(_) => "unknown_tool_error",
            Self::DuplicateName(_) => "duplicate_name_error",
            Self::ToolExecution { .. } => "tool_execution_error",
        }
    }

    /// Whether reopening the transport may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        let errors = [
            DispatchError::connection("math", "refused"),
            DispatchError::protocol("math", "bad frame"),
            DispatchError::timeout("tools/call", Duration::from_millis(5)),
            DispatchError::UnknownTool("nope".to_string()),
            DispatchError::DuplicateName("add".to_string()),
            DispatchError::tool_failed("add", "boom"),
        ];
        let mut kinds: Vec<&str> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }

    #[test]
    fn test_retryable_only_for_not_ready() {
        assert!(DispatchError::not_ready("math", "refused").is_retryable());
        assert!(!DispatchError::connection("math", "no such file").is_retryable());
        assert!(!DispatchError::protocol("math", "garbage").is_retryable());
        assert!(!DispatchError::timeout("ping", Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = DispatchError::timeout("tools/call add", Duration::from_millis(250));
        assert_eq!(err.to_string(), "'tools/call add' timed out after 250ms");

        let err = DispatchError::UnknownTool("divide".to_string());
        assert_eq!(err.to_string(), "Unknown tool: divide");

        let err = DispatchError::not_ready("currency", "connection refused");
        assert!(err.to_string().contains("currency"));
        assert!(err.to_string().contains("connection refused"));
    }
}
