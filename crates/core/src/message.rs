//! Message and content-block domain types.
//!
//! A [`Message`] is the provider-agnostic unit that flows through the whole
//! system: user input, model responses and tool results are all messages made
//! of ordered [`ContentBlock`]s. Format adapters translate them to and from
//! each provider's wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message producer in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user (or another agent speaking as a user)
    User,
    /// A model-backed agent
    Assistant,
    /// Tool execution results
    Tool,
    /// Out-of-band control signaling, never sent to a provider
    Control,
}

/// Kinds of control signal carried by [`ContentBlock::Control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    Interrupt,
    Resume,
}

/// Where the bytes of a media block come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Source {
    /// A remote or local URL.
    Url { url: String },

    /// Inline base64 data with its MIME type.
    Base64 { media_type: String, data: String },

    /// Raw PCM samples (16-bit little endian).
    Raw {
        sample_rate: u32,
        channels: u16,
        #[serde(with = "raw_bytes")]
        bytes: Vec<u8>,
    },
}

impl Source {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Base64 {
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// Raw bytes are serialized as a plain JSON array of numbers.
mod raw_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(bytes.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Vec::<u8>::deserialize(d)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    /// Call ID, echoed back by the matching [`ToolResultBlock`]
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments supplied by the model
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,

    /// Opaque provider continuation data (e.g. Gemini thought signatures)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolUseBlock {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            metadata: serde_json::Map::new(),
        }
    }
}

/// The outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    /// The [`ToolUseBlock::id`] this result answers
    pub id: String,

    /// Name of the tool that produced it
    pub name: String,

    /// Ordered output content
    #[serde(default)]
    pub output: Vec<ContentBlock>,

    /// Set when the tool failed; `output` then explains why
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultBlock {
    pub fn text(id: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            output: vec![ContentBlock::text(text)],
            is_error: false,
        }
    }

    pub fn error(id: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            output: vec![ContentBlock::text(format!("Error: {}", message.into()))],
            is_error: true,
        }
    }

    /// Concatenate the text blocks of the output.
    pub fn output_text(&self) -> String {
        join_text(&self.output)
    }
}

/// A typed unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: Source,
    },
    Audio {
        source: Source,
    },
    Video {
        source: Source,
    },
    /// A reasoning trace. `signature` is an opaque provider token that must be
    /// replayed verbatim on the next request to the same provider.
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    Control {
        control_type: ControlType,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(thinking: impl Into<String>, signature: Option<String>) -> Self {
        Self::Thinking {
            thinking: thinking.into(),
            signature,
        }
    }

    pub fn image(source: Source) -> Self {
        Self::Image { source }
    }

    /// Rank used to order parsed response blocks: thinking, text, tool use.
    pub fn response_rank(&self) -> u8 {
        match self {
            Self::Thinking { .. } => 0,
            Self::ToolUse(_) => 2,
            _ => 1,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Join all text blocks in `blocks` with newlines.
pub fn join_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sort parsed blocks into thinking, text, tool-use order. Stable within a rank.
pub fn order_response_blocks(mut blocks: Vec<ContentBlock>) -> Vec<ContentBlock> {
    blocks.sort_by_key(ContentBlock::response_rank);
    blocks
}

/// A single immutable message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Producer identity (agent or user name)
    pub name: String,

    /// Who produced this message
    pub role: Role,

    /// Ordered content blocks
    #[serde(default)]
    pub content: Vec<ContentBlock>,

    /// Free-form metadata (usage, finish reason, structured output, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Creation time
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with arbitrary blocks.
    pub fn new(name: impl Into<String>, role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            role,
            content,
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", Role::System, vec![ContentBlock::text(content)])
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", Role::User, vec![ContentBlock::text(content)])
    }

    pub fn assistant(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(name, Role::Assistant, vec![ContentBlock::text(content)])
    }

    /// A tool-role message holding one result.
    pub fn tool_result(name: impl Into<String>, result: ToolResultBlock) -> Self {
        Self::new(name, Role::Tool, vec![ContentBlock::ToolResult(result)])
    }

    /// A tool-role message holding several results, in call order.
    pub fn tool_results_message(name: impl Into<String>, results: Vec<ToolResultBlock>) -> Self {
        Self::new(
            name,
            Role::Tool,
            results.into_iter().map(ContentBlock::ToolResult).collect(),
        )
    }

    /// A control-role signaling message. Its content may be empty.
    pub fn control(name: impl Into<String>, control_type: ControlType) -> Self {
        Self::new(name, Role::Control, vec![ContentBlock::Control { control_type }])
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The first text block's string, or an empty string.
    pub fn text(&self) -> &str {
        self.content
            .iter()
            .find_map(ContentBlock::as_text)
            .unwrap_or("")
    }

    /// All text blocks joined by newlines.
    pub fn joined_text(&self) -> String {
        join_text(&self.content)
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUseBlock> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse(t) => Some(t),
            _ => None,
        })
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResultBlock> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult(r) => Some(r),
            _ => None,
        })
    }

    /// Reasoning traces carried by this message.
    pub fn thinking(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::Thinking { thinking, .. } => Some(thinking.as_str()),
            _ => None,
        })
    }

    pub fn has_tool_use(&self) -> bool {
        self.tool_uses().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Whether at least one format adapter can represent this message.
    ///
    /// Advisory only: adapters are still responsible for adapting or rejecting
    /// what they receive.
    pub fn is_representable(&self) -> bool {
        match self.role {
            Role::Control => true,
            Role::Tool => {
                !self.content.is_empty()
                    && self
                        .content
                        .iter()
                        .all(|b| matches!(b, ContentBlock::ToolResult(_)))
            }
            _ => !self.content.is_empty(),
        }
    }
}
