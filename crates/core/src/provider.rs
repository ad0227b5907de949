//! Provider contracts: transport and format adaptation.
//!
//! A [`Transport`] moves opaque JSON request bodies to an LLM endpoint and
//! returns JSON responses (or a stream of JSON chunks). A [`Formatter`] knows one
//! provider family's wire format: it turns canonical [`Message`]s and
//! [`ToolSchema`]s into a request body and parses responses back into
//! [`ContentBlock`]s. The loop controller only ever sees canonical types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FormatError, ProviderError};
use crate::message::{ContentBlock, Message, ToolUseBlock, order_response_blocks};
use crate::tool::ToolSchema;

/// A formatted request ready for a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g. "gpt-4o", "qwen-max")
    pub model: String,

    /// Provider-specific JSON body built by a [`Formatter`]
    pub body: serde_json::Value,

    /// Whether the transport should stream
    #[serde(default)]
    pub stream: bool,
}

/// Generation parameters shared by every formatter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    /// Token budget for reasoning traces; `None` leaves thinking off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolUse,
    MaxTokens,
    ContentFilter,
    Other(String),
    #[default]
    Unknown,
}

impl FinishReason {
    /// Map the common provider vocabularies onto our enum.
    pub fn from_provider(raw: &str) -> Self {
        match raw {
            "stop" | "end_turn" | "STOP" | "stop_sequence" => Self::Stop,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolUse,
            "length" | "max_tokens" | "MAX_TOKENS" => Self::MaxTokens,
            "content_filter" | "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST" => {
                Self::ContentFilter
            }
            "null" | "" => Self::Unknown,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A parsed, canonical model response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider response ID, when given
    #[serde(default)]
    pub id: String,

    /// Blocks in thinking → text → tool-use order
    pub content: Vec<ContentBlock>,

    #[serde(default)]
    pub finish_reason: FinishReason,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Build a response, enforcing block order.
    pub fn new(
        id: impl Into<String>,
        content: Vec<ContentBlock>,
        finish_reason: FinishReason,
        usage: Option<Usage>,
    ) -> Self {
        Self {
            id: id.into(),
            content: order_response_blocks(content),
            finish_reason,
            usage,
        }
    }

    /// A response with a single explanatory text block, used when the
    /// provider returned nothing usable.
    pub fn explanation(text: impl Into<String>, finish_reason: FinishReason) -> Self {
        Self {
            id: String::new(),
            content: vec![ContentBlock::text(text)],
            finish_reason,
            usage: None,
        }
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUseBlock> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse(t) => Some(t),
            _ => None,
        })
    }
}

/// An incremental piece of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamDelta {
    /// Partial answer text
    Text { text: String },

    /// Partial reasoning text
    Thinking { text: String },

    /// A tool call began; its arguments are still being accumulated
    ToolCallStarted { id: String, name: String },
}

/// Incremental response parser for one streamed request.
///
/// Tool-call argument fragments are buffered as raw text and parsed exactly
/// once, in [`StreamParser::finish`].
pub trait StreamParser: Send {
    /// Feed one provider chunk; returns the deltas it contained.
    fn push(&mut self, chunk: &serde_json::Value) -> Vec<StreamDelta>;

    /// Whether the provider has signalled completion.
    fn is_done(&self) -> bool {
        false
    }

    /// Assemble the complete response.
    fn finish(self: Box<Self>) -> ChatResponse;
}

/// Converts canonical messages to one provider family's wire format and back.
pub trait Formatter: Send + Sync {
    /// Formatter name (e.g. "openai", "anthropic").
    fn name(&self) -> &str;

    /// Build the request body for `messages`.
    fn format(
        &self,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<serde_json::Value, FormatError>;

    /// Add tool declarations to a formatted body.
    fn apply_tools(&self, body: &mut serde_json::Value, tools: &[ToolSchema]);

    /// Switch a formatted body to streaming mode.
    fn enable_streaming(&self, body: &mut serde_json::Value);

    /// Parse a complete (non-streamed) provider response.
    fn parse_response(&self, response: &serde_json::Value) -> ChatResponse;

    /// Create an incremental parser for a streamed response.
    fn stream_parser(&self) -> Box<dyn StreamParser>;

    /// Whether single-property wrapper schemas are sent unwrapped, so the
    /// model answers with the inner fields directly.
    fn unwraps_wrapper(&self) -> bool {
        false
    }
}

/// Receiver half of a streamed provider response.
pub type ChunkReceiver = tokio::sync::mpsc::Receiver<Result<serde_json::Value, ProviderError>>;

/// Moves formatted requests to a provider endpoint.
///
/// Implementations: HTTP (reqwest), scripted mocks for tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// A human-readable name (e.g. "openai-http").
    fn name(&self) -> &str;

    /// Send a request and get the complete JSON response.
    async fn send(&self, request: ProviderRequest) -> Result<serde_json::Value, ProviderError>;

    /// Send a request and get a stream of JSON chunks.
    ///
    /// Default implementation calls `send()` and yields the result as a single chunk.
    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let response = self.send(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx.send(Ok(response)).await;
        Ok(rx)
    }
}
