//! Error types for the Reagent domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] is what the loop
//! controller returns to its caller.

use thiserror::Error;

use crate::hook::HookPhase;

/// The top-level error type for all Reagent operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider transport errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Request formatting errors ---
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Hook errors, tagged with the stage that fired the event ---
    #[error("Hook failed during {phase}: {source}")]
    Hook {
        phase: HookPhase,
        #[source]
        source: HookError,
    },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response body: {0}")]
    InvalidResponse(String),
}

/// Raised while building a provider request from canonical messages.
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    #[error("Unsupported content for {provider}: {reason}")]
    Unsupported { provider: String, reason: String },

    #[error("No messages left to send after formatting")]
    EmptyRequest,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s (timeout)")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Duplicate tool name: {0}")]
    Duplicate(String),

    #[error("Unknown tool group: {0}")]
    UnknownGroup(String),

    #[error("Remote tool provider failed: {0}")]
    Remote(String),
}

impl ToolError {
    /// Shorthand for an execution failure.
    pub fn failed(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }
}

/// Raised by a hook handler; aborts the rest of the chain.
#[derive(Debug, Clone, Error)]
#[error("hook '{hook}' rejected the event: {reason}")]
pub struct HookError {
    pub hook: String,
    pub reason: String,
}

impl HookError {
    pub fn new(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn hook_error_names_phase() {
        let err = Error::Hook {
            phase: HookPhase::Acting,
            source: HookError::new("guard", "blocked"),
        };
        let text = err.to_string();
        assert!(text.contains("acting"));
        assert!(text.contains("guard"));
    }

    #[test]
    fn timeout_mentions_timeout() {
        let err = ToolError::Timeout {
            tool_name: "fetch".into(),
            timeout_secs: 3,
        };
        assert!(err.to_string().contains("timeout"));
    }
}
