//! Anthropic Messages API format adapter.
//!
//! Features:
//! - System prompt as top-level field
//! - Native `tool_use` / `tool_result` content blocks (results travel in user turns)
//! - Extended thinking with signatures replayed verbatim
//! - Streaming via typed SSE events (`content_block_start` / `_delta` / `_stop`)

use std::collections::BTreeMap;

use reagent_core::message::{ContentBlock, Message, Role, Source, ToolResultBlock, ToolUseBlock};
use reagent_core::provider::{
    ChatResponse, FinishReason, Formatter, GenerateOptions, StreamDelta, StreamParser, Usage,
};
use reagent_core::{FormatError, ToolSchema};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::media;
use crate::openai::parse_usage;
use crate::response::{finish_blocks, generate_call_id, object_arguments, parse_arguments};
use crate::schema::SchemaPolicy;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Formatter for the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicFormatter {
    policy: SchemaPolicy,
    default_max_tokens: u32,
}

impl Default for AnthropicFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicFormatter {
    pub fn new() -> Self {
        Self {
            policy: SchemaPolicy::anthropic(),
            default_max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// `max_tokens` is mandatory for this API; used when options leave it unset.
    pub fn with_default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    /// Split off a leading system message.
    fn extract_system(messages: &[Message]) -> (Option<String>, &[Message]) {
        match messages.first() {
            Some(first) if first.role == Role::System => {
                (Some(first.joined_text()), &messages[1..])
            }
            _ => (None, messages),
        }
    }

    fn media_block(kind: &str, source: &Source) -> Option<Value> {
        if kind != "image" {
            warn!(provider = "anthropic", kind, "Unsupported media kind, skipping block");
            return None;
        }
        Some(match source {
            Source::Url { url } if !url.starts_with("data:") => {
                json!({"type": "image", "source": {"type": "url", "url": url}})
            }
            other => {
                let (media_type, data) = media::inline_data(other)?;
                json!({"type": "image", "source": {"type": "base64", "media_type": media_type, "data": data}})
            }
        })
    }

    fn user_blocks(message: &Message) -> Vec<Value> {
        message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentBlock::Image { source } => Self::media_block("image", source),
                ContentBlock::Audio { source } => Self::media_block("audio", source),
                ContentBlock::Video { source } => Self::media_block("video", source),
                _ => None,
            })
            .collect()
    }

    fn assistant_blocks(message: &Message) -> Vec<Value> {
        message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Thinking {
                    thinking,
                    signature: Some(signature),
                } => Some(json!({"type": "thinking", "thinking": thinking, "signature": signature})),
                ContentBlock::Thinking { signature: None, .. } => {
                    trace!("Dropping unsigned thinking block");
                    None
                }
                ContentBlock::Text { text } if !text.is_empty() => {
                    Some(json!({"type": "text", "text": text}))
                }
                ContentBlock::ToolUse(call) => Some(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": Value::Object(call.input.clone()),
                })),
                _ => None,
            })
            .collect()
    }

    fn tool_result_block(result: &ToolResultBlock) -> Value {
        let content: Vec<Value> = result
            .output
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
                ContentBlock::Image { source } => Self::media_block("image", source),
                _ => None,
            })
            .collect();
        let mut block = json!({
            "type": "tool_result",
            "tool_use_id": result.id,
            "content": content,
        });
        if result.is_error {
            block["is_error"] = json!(true);
        }
        block
    }
}

/// Append blocks under `role`, merging with the previous turn of the same role.
fn push_turn(turns: &mut Vec<Value>, role: &str, blocks: Vec<Value>) {
    if blocks.is_empty() {
        return;
    }
    if let Some(last) = turns.last_mut() {
        if last["role"] == role {
            if let Some(existing) = last["content"].as_array_mut() {
                existing.extend(blocks);
                return;
            }
        }
    }
    turns.push(json!({"role": role, "content": blocks}));
}

impl Formatter for AnthropicFormatter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn unwraps_wrapper(&self) -> bool {
        self.policy.unwrap_wrapper
    }

    fn format(&self, messages: &[Message], options: &GenerateOptions) -> Result<Value, FormatError> {
        let (system, rest) = Self::extract_system(messages);
        let mut turns: Vec<Value> = Vec::new();

        for message in rest {
            match message.role {
                Role::Control => continue,
                // Only a leading system message has its own channel.
                Role::System => push_turn(
                    &mut turns,
                    "user",
                    vec![json!({"type": "text", "text": message.joined_text()})],
                ),
                Role::User => push_turn(&mut turns, "user", Self::user_blocks(message)),
                Role::Assistant => push_turn(&mut turns, "assistant", Self::assistant_blocks(message)),
                Role::Tool => push_turn(
                    &mut turns,
                    "user",
                    message.tool_results().map(Self::tool_result_block).collect(),
                ),
            }
        }

        if turns.is_empty() {
            return Err(FormatError::EmptyRequest);
        }

        let mut max_tokens = options.max_tokens.unwrap_or(self.default_max_tokens);
        let mut body = json!({ "messages": turns });

        if let Some(system) = system.filter(|s| !s.is_empty()) {
            body["system"] = json!(system);
        }

        if let Some(budget) = options.thinking_budget {
            // budget_tokens must stay below max_tokens
            if max_tokens <= budget {
                max_tokens = budget + self.default_max_tokens;
            }
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        } else {
            // temperature/top_p are rejected while thinking is enabled
            if let Some(t) = options.temperature {
                body["temperature"] = json!(t);
            }
            if let Some(top_p) = options.top_p {
                body["top_p"] = json!(top_p);
            }
        }

        body["max_tokens"] = json!(max_tokens);
        if !options.stop.is_empty() {
            body["stop_sequences"] = json!(options.stop);
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
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": self.policy.prepare(tool).unwrap_or_else(|| json!({"type": "object"})),
                })
            })
            .collect();
        body["tools"] = json!(declarations);
    }

    fn enable_streaming(&self, body: &mut Value) {
        body["stream"] = json!(true);
    }

    fn parse_response(&self, response: &Value) -> ChatResponse {
        let id = response["id"].as_str().unwrap_or_default().to_string();
        let usage = parse_usage(&response["usage"]);
        let finish_reason = response["stop_reason"]
            .as_str()
            .map(FinishReason::from_provider)
            .unwrap_or_default();

        let mut blocks = Vec::new();
        for block in response["content"].as_array().into_iter().flatten() {
            match block["type"].as_str() {
                Some("text") => {
                    let text = block["text"].as_str().unwrap_or_default();
                    if !text.is_empty() {
                        blocks.push(ContentBlock::text(text));
                    }
                }
                Some("thinking") => blocks.push(ContentBlock::thinking(
                    block["thinking"].as_str().unwrap_or_default(),
                    block["signature"].as_str().map(str::to_string),
                )),
                Some("tool_use") => {
                    let name = block["name"].as_str().unwrap_or_default();
                    let Some(input) = object_arguments(name, &block["input"]) else {
                        continue;
                    };
                    let id = block["id"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(generate_call_id);
                    blocks.push(ContentBlock::ToolUse(ToolUseBlock::new(id, name, input)));
                }
                other => debug!(block_type = ?other, "Ignoring Anthropic content block"),
            }
        }

        finish_blocks(id, blocks, finish_reason, usage, |reason| match reason {
            FinishReason::Other(r) if r == "refusal" => "the model refused to answer".into(),
            other => format!("empty content, stop reason: {other:?}"),
        })
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(AnthropicStreamParser::default())
    }
}

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    Thinking { text: String, signature: Option<String> },
    ToolUse { id: String, name: String, json: String, initial: Value },
}

/// Reassembles a response from Anthropic's typed stream events.
#[derive(Debug, Default)]
struct AnthropicStreamParser {
    id: String,
    blocks: BTreeMap<u64, PartialBlock>,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<FinishReason>,
    error: Option<String>,
    done: bool,
}

impl StreamParser for AnthropicStreamParser {
    fn push(&mut self, event: &Value) -> Vec<StreamDelta> {
        let mut deltas = Vec::new();
        let index = event["index"].as_u64().unwrap_or(0);

        match event["type"].as_str() {
            Some("message_start") => {
                let message = &event["message"];
                self.id = message["id"].as_str().unwrap_or_default().to_string();
                self.input_tokens = message["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32;
            }
            Some("content_block_start") => {
                let block = &event["content_block"];
                let partial = match block["type"].as_str() {
                    Some("text") => PartialBlock::Text(block["text"].as_str().unwrap_or_default().into()),
                    Some("thinking") => PartialBlock::Thinking {
                        text: block["thinking"].as_str().unwrap_or_default().into(),
                        signature: None,
                    },
                    Some("tool_use") => {
                        let id = block["id"].as_str().unwrap_or_default().to_string();
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        deltas.push(StreamDelta::ToolCallStarted {
                            id: id.clone(),
                            name: name.clone(),
                        });
                        PartialBlock::ToolUse {
                            id,
                            name,
                            json: String::new(),
                            initial: block["input"].clone(),
                        }
                    }
                    other => {
                        trace!(block_type = ?other, "Ignoring stream content block");
                        return deltas;
                    }
                };
                self.blocks.insert(index, partial);
            }
            Some("content_block_delta") => {
                let delta = &event["delta"];
                match (self.blocks.get_mut(&index), delta["type"].as_str()) {
                    (Some(PartialBlock::Text(text)), Some("text_delta")) => {
                        let piece = delta["text"].as_str().unwrap_or_default();
                        text.push_str(piece);
                        deltas.push(StreamDelta::Text { text: piece.into() });
                    }
                    (Some(PartialBlock::Thinking { text, .. }), Some("thinking_delta")) => {
                        let piece = delta["thinking"].as_str().unwrap_or_default();
                        text.push_str(piece);
                        deltas.push(StreamDelta::Thinking { text: piece.into() });
                    }
                    (Some(PartialBlock::Thinking { signature, .. }), Some("signature_delta")) => {
                        let piece = delta["signature"].as_str().unwrap_or_default();
                        signature.get_or_insert_with(String::new).push_str(piece);
                    }
                    (Some(PartialBlock::ToolUse { json, .. }), Some("input_json_delta")) => {
                        json.push_str(delta["partial_json"].as_str().unwrap_or_default());
                    }
                    (_, kind) => trace!(index, delta_type = ?kind, "Unmatched content_block_delta"),
                }
            }
            Some("message_delta") => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(FinishReason::from_provider(reason));
                }
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = out as u32;
                }
            }
            Some("message_stop") => self.done = true,
            Some("error") => {
                let message = event["error"]["message"].as_str().unwrap_or("unknown error");
                warn!(provider = "anthropic", error = message, "Stream reported an error");
                self.error = Some(message.to_string());
                self.done = true;
            }
            // content_block_stop, ping
            _ => {}
        }

        deltas
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn finish(self: Box<Self>) -> ChatResponse {
        let this = *self;
        let mut blocks = Vec::new();
        for partial in this.blocks.into_values() {
            match partial {
                PartialBlock::Text(text) if !text.is_empty() => blocks.push(ContentBlock::text(text)),
                PartialBlock::Text(_) => {}
                PartialBlock::Thinking { text, signature } => {
                    blocks.push(ContentBlock::thinking(text, signature))
                }
                PartialBlock::ToolUse {
                    id,
                    name,
                    json,
                    initial,
                } => {
                    let input = if json.is_empty() {
                        object_arguments(&name, &initial)
                    } else {
                        parse_arguments(&name, &json)
                    };
                    if let Some(input) = input {
                        let id = if id.is_empty() { generate_call_id() } else { id };
                        blocks.push(ContentBlock::ToolUse(ToolUseBlock::new(id, name, input)));
                    }
                }
            }
        }

        let usage = (this.input_tokens > 0 || this.output_tokens > 0)
            .then(|| Usage::new(this.input_tokens, this.output_tokens));
        let error = this.error;
        finish_blocks(
            this.id,
            blocks,
            this.stop_reason.unwrap_or_default(),
            usage,
            move |reason| match error {
                Some(e) => format!("the stream failed: {e}"),
                None => format!("empty content, stop reason: {reason:?}"),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_extraction() {
        let body = AnthropicFormatter::new()
            .format(
                &[Message::system("You are helpful"), Message::user("Hello")],
                &GenerateOptions::default(),
            )
            .unwrap();
        assert_eq!(body["system"], "You are helpful");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["content"][0]["text"], "Hello");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_results_merge_into_one_user_turn() {
        let call = Message::new(
            "bot",
            Role::Assistant,
            vec![
                ContentBlock::thinking("plan", Some("sig-1".into())),
                ContentBlock::ToolUse(ToolUseBlock::new("t1", "a", Default::default())),
                ContentBlock::ToolUse(ToolUseBlock::new("t2", "b", Default::default())),
            ],
        );
        let messages = vec![
            Message::user("go"),
            call,
            Message::tool_result("bot", ToolResultBlock::text("t1", "a", "one")),
            Message::tool_result("bot", ToolResultBlock::error("t2", "b", "boom")),
        ];
        let body = AnthropicFormatter::new()
            .format(&messages, &GenerateOptions::default())
            .unwrap();
        let turns = body["messages"].as_array().unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1]["content"][0]["type"], "thinking");
        assert_eq!(turns[1]["content"][0]["signature"], "sig-1");
        assert_eq!(turns[2]["role"], "user");
        let results = turns[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "t1");
        assert_eq!(results[1]["is_error"], true);
    }

    #[test]
    fn thinking_budget_adjusts_max_tokens_and_drops_temperature() {
        let options = GenerateOptions {
            temperature: Some(0.5),
            max_tokens: Some(1000),
            thinking_budget: Some(2048),
            ..GenerateOptions::default()
        };
        let body = AnthropicFormatter::new()
            .format(&[Message::user("x")], &options)
            .unwrap();
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
        assert!(body["max_tokens"].as_u64().unwrap() > 2048);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn empty_parameters_become_plain_object() {
        let mut body = json!({});
        AnthropicFormatter::new().apply_tools(
            &mut body,
            &[ToolSchema::new("now", "time", json!({"type": "object", "properties": {}}))],
        );
        assert_eq!(body["tools"][0]["input_schema"], json!({"type": "object"}));
    }

    #[test]
    fn parse_thinking_response() {
        let response = json!({
            "id": "msg_1",
            "content": [
                {"type": "tool_use", "id": "tu_1", "name": "get_weather", "input": {"city": "Paris"}},
                {"type": "text", "text": "Checking."},
                {"type": "thinking", "thinking": "weather needed", "signature": "abc"}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 10}
        });
        let parsed = AnthropicFormatter::new().parse_response(&response);
        let ContentBlock::Thinking { signature, .. } = &parsed.content[0] else {
            panic!("expected thinking first");
        };
        assert_eq!(signature.as_deref(), Some("abc"));
        assert_eq!(parsed.content[1].as_text(), Some("Checking."));
        assert_eq!(parsed.tool_uses().next().unwrap().id, "tu_1");
        assert_eq!(parsed.finish_reason, FinishReason::ToolUse);
    }

    #[test]
    fn stream_events_reassemble() {
        let events = [
            json!({"type": "message_start", "message": {"id": "msg_s", "usage": {"input_tokens": 5}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "let me"}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "signature_delta", "signature": "SIG"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "tu", "name": "calc", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"a\":"}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": " 1}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 7}}),
            json!({"type": "message_stop"}),
        ];
        let mut parser = AnthropicFormatter::new().stream_parser();
        let mut deltas = Vec::new();
        for e in &events {
            deltas.extend(parser.push(e));
        }
        assert!(parser.is_done());
        assert_eq!(deltas[0], StreamDelta::Thinking { text: "let me".into() });
        assert!(matches!(deltas[1], StreamDelta::ToolCallStarted { .. }));

        let response = parser.finish();
        assert_eq!(response.id, "msg_s");
        let ContentBlock::Thinking { signature, .. } = &response.content[0] else {
            panic!("expected thinking");
        };
        assert_eq!(signature.as_deref(), Some("SIG"));
        assert_eq!(response.tool_uses().next().unwrap().input["a"], 1);
        assert_eq!(response.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn stream_error_is_explained() {
        let mut parser = AnthropicFormatter::new().stream_parser();
        parser.push(&json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}));
        let response = parser.finish();
        assert!(response.content[0].as_text().unwrap().contains("Overloaded"));
    }
}
