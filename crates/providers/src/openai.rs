//! OpenAI chat-completions format adapter.
//!
//! Works with OpenAI and any OpenAI-compatible `/chat/completions` endpoint
//! (OpenRouter, vLLM, Ollama, DeepSeek, ...).
//!
//! - System messages stay inline as the first entry
//! - Images become `image_url` parts (inline data as a data URL)
//! - Audio becomes `input_audio` parts (inline data only)
//! - Reasoning traces are read from `reasoning_content`
//! - Streaming tool calls arrive as indexed argument fragments

use reagent_core::message::{ContentBlock, Message, Role, ToolResultBlock};
use reagent_core::provider::{
    ChatResponse, FinishReason, Formatter, GenerateOptions, StreamDelta, StreamParser, Usage,
};
use reagent_core::{FormatError, ToolSchema};
use serde_json::{Value, json};
use tracing::{trace, warn};

use crate::media;
use crate::response::{ToolCallAccumulator, finish_blocks, object_arguments};
use crate::schema::SchemaPolicy;

/// Formatter for the OpenAI chat-completions API.
#[derive(Debug, Clone)]
pub struct OpenAiFormatter {
    policy: SchemaPolicy,
}

impl Default for OpenAiFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiFormatter {
    pub fn new() -> Self {
        Self {
            policy: SchemaPolicy::openai(),
        }
    }

    pub fn with_policy(mut self, policy: SchemaPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn user_parts(message: &Message) -> Value {
        let media_free = message
            .content
            .iter()
            .all(|b| matches!(b, ContentBlock::Text { .. }));
        if media_free {
            return json!(message.joined_text());
        }

        let parts: Vec<Value> = message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentBlock::Image { source } => Some(json!({
                    "type": "image_url",
                    "image_url": {"url": media::to_url(source)},
                })),
                ContentBlock::Audio { source } => match media::inline_data(source) {
                    Some((media_type, data)) => Some(json!({
                        "type": "input_audio",
                        "input_audio": {"data": data, "format": media::audio_format(&media_type)},
                    })),
                    None => {
                        warn!(provider = "openai", "Audio by URL is not supported, skipping block");
                        None
                    }
                },
                ContentBlock::Video { .. } => {
                    warn!(provider = "openai", "Video input is not supported, skipping block");
                    None
                }
                _ => None,
            })
            .collect();
        json!(parts)
    }

    fn assistant_entry(message: &Message) -> Option<Value> {
        let text = message.joined_text();
        let tool_calls: Vec<Value> = message
            .tool_uses()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": Value::Object(call.input.clone()).to_string(),
                    },
                })
            })
            .collect();

        if text.is_empty() && tool_calls.is_empty() {
            return None;
        }

        let mut entry = json!({
            "role": "assistant",
            "content": if text.is_empty() { Value::Null } else { json!(text) },
        });
        if !tool_calls.is_empty() {
            entry["tool_calls"] = json!(tool_calls);
        }
        Some(entry)
    }

    /// One `tool` entry per result, plus a user entry carrying any media the
    /// tools returned (tool messages are text-only).
    fn tool_entries(results: Vec<&ToolResultBlock>, out: &mut Vec<Value>) {
        let mut promoted: Vec<Value> = Vec::new();
        for result in results {
            out.push(json!({
                "role": "tool",
                "tool_call_id": result.id,
                "content": result.output_text(),
            }));
            for block in &result.output {
                if let ContentBlock::Image { source } = block {
                    if promoted.is_empty() {
                        promoted.push(json!({
                            "type": "text",
                            "text": "<system-info>Media returned by tool calls follows.</system-info>",
                        }));
                    }
                    promoted.push(json!({"type": "text", "text": format!("Tool `{}` (call {}) returned:", result.name, result.id)}));
                    promoted.push(json!({"type": "image_url", "image_url": {"url": media::to_url(source)}}));
                }
            }
        }
        if !promoted.is_empty() {
            out.push(json!({"role": "user", "content": promoted}));
        }
    }
}

impl Formatter for OpenAiFormatter {
    fn name(&self) -> &str {
        "openai"
    }

    fn unwraps_wrapper(&self) -> bool {
        self.policy.unwrap_wrapper
    }

    fn format(&self, messages: &[Message], options: &GenerateOptions) -> Result<Value, FormatError> {
        let mut entries = Vec::new();

        for message in messages {
            match message.role {
                Role::Control => continue,
                Role::System => {
                    let text = message.joined_text();
                    if !text.is_empty() {
                        entries.push(json!({"role": "system", "content": text}));
                    }
                }
                Role::User => {
                    if message.content.is_empty() {
                        continue;
                    }
                    entries.push(json!({"role": "user", "content": Self::user_parts(message)}));
                }
                Role::Assistant => {
                    if let Some(entry) = Self::assistant_entry(message) {
                        entries.push(entry);
                    }
                }
                Role::Tool => Self::tool_entries(message.tool_results().collect(), &mut entries),
            }
        }

        if entries.is_empty() {
            return Err(FormatError::EmptyRequest);
        }

        let mut body = json!({ "messages": entries });
        if let Some(t) = options.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = options.top_p {
            body["top_p"] = json!(top_p);
        }
        if !options.stop.is_empty() {
            body["stop"] = json!(options.stop);
        }
        Ok(body)
    }

    fn apply_tools(&self, body: &mut Value, tools: &[ToolSchema]) {
        if tools.is_empty() {
            return;
        }
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                let mut function = json!({
                    "name": tool.name,
                    "description": tool.description,
                });
                if let Some(params) = self.policy.prepare(tool) {
                    function["parameters"] = params;
                }
                json!({"type": "function", "function": function})
            })
            .collect();
        body["tools"] = json!(declarations);
    }

    fn enable_streaming(&self, body: &mut Value) {
        body["stream"] = json!(true);
        body["stream_options"] = json!({"include_usage": true});
    }

    fn parse_response(&self, response: &Value) -> ChatResponse {
        let id = response["id"].as_str().unwrap_or_default().to_string();
        let usage = parse_usage(&response["usage"]);

        let Some(choice) = response["choices"].as_array().and_then(|c| c.first()) else {
            return finish_blocks(id, vec![], FinishReason::Unknown, usage, |_| {
                "no choices in the response".into()
            });
        };

        let finish_reason = choice["finish_reason"]
            .as_str()
            .map(FinishReason::from_provider)
            .unwrap_or_default();
        let blocks = blocks_from_message(&choice["message"]);
        finish_blocks(id, blocks, finish_reason, usage, empty_detail)
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(ChoiceStreamParser::default())
    }
}

pub(crate) fn empty_detail(reason: &FinishReason) -> String {
    match reason {
        FinishReason::ContentFilter => "the response was blocked by the content filter".into(),
        FinishReason::MaxTokens => "the token limit was reached before any output".into(),
        other => format!("empty content, finish reason: {other:?}"),
    }
}

pub(crate) fn parse_usage(usage: &Value) -> Option<Usage> {
    let prompt = usage
        .get("prompt_tokens")
        .or_else(|| usage.get("input_tokens"))?
        .as_u64()?;
    let completion = usage
        .get("completion_tokens")
        .or_else(|| usage.get("output_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Some(Usage::new(prompt as u32, completion as u32))
}

/// Content blocks of an OpenAI-shaped `message` object.
pub(crate) fn blocks_from_message(message: &Value) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    if let Some(reasoning) = message["reasoning_content"].as_str() {
        if !reasoning.is_empty() {
            blocks.push(ContentBlock::thinking(reasoning, None));
        }
    }

    let text = content_text(&message["content"]);
    if !text.is_empty() {
        blocks.push(ContentBlock::text(text));
    }

    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let name = call["function"]["name"].as_str().unwrap_or_default();
            if name.is_empty() {
                warn!("Tool call without a function name, skipping");
                continue;
            }
            let Some(input) = object_arguments(name, &call["function"]["arguments"]) else {
                continue;
            };
            let id = call["id"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(crate::response::generate_call_id);
            blocks.push(ContentBlock::ToolUse(
                reagent_core::ToolUseBlock::new(id, name, input),
            ));
        }
    }

    blocks
}

/// Text of a `content` field that may be a string or a list of parts.
pub(crate) fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Stream parser for `choices[].delta` chunks.
///
/// DashScope reuses it with `for_dashscope`, where chunks nest under `output`
/// and carry `message` instead of `delta`.
#[derive(Debug, Default)]
pub(crate) struct ChoiceStreamParser {
    dashscope: bool,
    id: String,
    thinking: String,
    text: String,
    tools: ToolCallAccumulator,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl ChoiceStreamParser {
    pub(crate) fn for_dashscope() -> Self {
        Self {
            dashscope: true,
            ..Self::default()
        }
    }
}

impl StreamParser for ChoiceStreamParser {
    fn push(&mut self, chunk: &Value) -> Vec<StreamDelta> {
        let mut deltas = Vec::new();

        let id_key = if self.dashscope { "request_id" } else { "id" };
        if let Some(id) = chunk[id_key].as_str() {
            if self.id.is_empty() {
                self.id = id.to_string();
            }
        }
        if let Some(usage) = parse_usage(&chunk["usage"]) {
            self.usage = Some(usage);
        }

        let (choices, delta_key) = if self.dashscope {
            (&chunk["output"]["choices"], "message")
        } else {
            (&chunk["choices"], "delta")
        };

        let Some(choice) = choices.as_array().and_then(|c| c.first()) else {
            trace!("Stream chunk without choices");
            return deltas;
        };
        let delta = &choice[delta_key];

        if let Some(reasoning) = delta["reasoning_content"].as_str() {
            if !reasoning.is_empty() {
                self.thinking.push_str(reasoning);
                deltas.push(StreamDelta::Thinking {
                    text: reasoning.to_string(),
                });
            }
        }

        let text = content_text(&delta["content"]);
        if !text.is_empty() {
            self.text.push_str(&text);
            deltas.push(StreamDelta::Text { text });
        }

        if let Some(fragments) = delta["tool_calls"].as_array() {
            for fragment in fragments {
                let id = fragment["id"].as_str();
                let index = self.tools.resolve_index(fragment["index"].as_u64(), id);
                if let Some(started) = self.tools.push(
                    index,
                    id,
                    fragment["function"]["name"].as_str(),
                    fragment["function"]["arguments"].as_str(),
                ) {
                    deltas.push(started);
                }
            }
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            let reason = FinishReason::from_provider(reason);
            if reason != FinishReason::Unknown {
                self.finish_reason = Some(reason);
            }
        }

        deltas
    }

    fn is_done(&self) -> bool {
        // OpenAI sends usage in a trailing chunk after finish_reason.
        self.finish_reason.is_some() && (self.dashscope || self.usage.is_some())
    }

    fn finish(self: Box<Self>) -> ChatResponse {
        let this = *self;
        let mut blocks = Vec::new();
        if !this.thinking.is_empty() {
            blocks.push(ContentBlock::thinking(this.thinking, None));
        }
        if !this.text.is_empty() {
            blocks.push(ContentBlock::text(this.text));
        }
        if !this.tools.is_empty() {
            blocks.extend(this.tools.finish());
        }
        finish_blocks(
            this.id,
            blocks,
            this.finish_reason.unwrap_or_default(),
            this.usage,
            empty_detail,
        )
    }
}
