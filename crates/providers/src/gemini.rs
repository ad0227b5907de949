//! Google Gemini `generateContent` format adapter.
//!
//! Roles are `user` and `model`; the leading system message becomes
//! `systemInstruction`. Tool results are `functionResponse` parts keyed by the
//! name of the call they answer. Thought signatures are kept on the canonical
//! blocks and sent back on the next turn.

use std::collections::HashMap;

use reagent_core::message::{ContentBlock, Message, Role, Source, ToolResultBlock, ToolUseBlock};
use reagent_core::provider::{
    ChatResponse, FinishReason, Formatter, GenerateOptions, StreamDelta, StreamParser, Usage,
};
use reagent_core::{FormatError, ToolSchema};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::media;
use crate::response::{finish_blocks, generate_call_id, object_arguments};
use crate::schema::SchemaPolicy;

/// Metadata key under which a function call's thought signature is stored.
pub const THOUGHT_SIGNATURE: &str = "thoughtSignature";

/// Formatter for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiFormatter {
    policy: SchemaPolicy,
}

impl Default for GeminiFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiFormatter {
    pub fn new() -> Self {
        Self {
            policy: SchemaPolicy::gemini(),
        }
    }

    fn media_part(source: &Source, fallback_type: &str) -> Option<Value> {
        match source {
            Source::Url { url } if !url.starts_with("data:") => Some(json!({
                "fileData": {
                    "mimeType": media::guess_media_type(url, fallback_type),
                    "fileUri": url,
                }
            })),
            other => {
                let (mime_type, data) = media::inline_data(other)?;
                Some(json!({"inlineData": {"mimeType": mime_type, "data": data}}))
            }
        }
    }

    fn block_part(block: &ContentBlock) -> Option<Value> {
        match block {
            ContentBlock::Text { text } if !text.is_empty() => Some(json!({"text": text})),
            ContentBlock::Image { source } => Self::media_part(source, "image/png"),
            ContentBlock::Audio { source } => Self::media_part(source, "audio/wav"),
            ContentBlock::Video { source } => Self::media_part(source, "video/mp4"),
            ContentBlock::Thinking {
                thinking,
                signature,
            } => {
                let mut part = json!({"text": thinking, "thought": true});
                if let Some(signature) = signature {
                    part[THOUGHT_SIGNATURE] = json!(signature);
                }
                Some(part)
            }
            ContentBlock::ToolUse(call) => {
                let mut part = json!({
                    "functionCall": {"name": call.name, "args": Value::Object(call.input.clone())}
                });
                if let Some(signature) = call.metadata.get(THOUGHT_SIGNATURE) {
                    part[THOUGHT_SIGNATURE] = signature.clone();
                }
                Some(part)
            }
            _ => None,
        }
    }

    fn result_parts(result: &ToolResultBlock, names: &HashMap<&str, &str>) -> Vec<Value> {
        let name = names.get(result.id.as_str()).copied().unwrap_or(&result.name);
        let text = result.output_text();
        let response = if result.is_error {
            json!({"error": text})
        } else {
            json!({"output": text})
        };
        let mut parts = vec![json!({"functionResponse": {"name": name, "response": response}})];
        // Media output travels as sibling parts of the same turn.
        parts.extend(result.output.iter().filter_map(|block| match block {
            ContentBlock::Text { .. } => None,
            other => Self::block_part(other),
        }));
        parts
    }
}

fn push_content(contents: &mut Vec<Value>, role: &str, parts: Vec<Value>) {
    if parts.is_empty() {
        return;
    }
    if let Some(last) = contents.last_mut() {
        if last["role"] == role {
            if let Some(existing) = last["parts"].as_array_mut() {
                existing.extend(parts);
                return;
            }
        }
    }
    contents.push(json!({"role": role, "parts": parts}));
}

impl Formatter for GeminiFormatter {
    fn name(&self) -> &str {
        "gemini"
    }

    fn unwraps_wrapper(&self) -> bool {
        self.policy.unwrap_wrapper
    }

    fn format(&self, messages: &[Message], options: &GenerateOptions) -> Result<Value, FormatError> {
        let names: HashMap<&str, &str> = messages
            .iter()
            .flat_map(Message::tool_uses)
            .map(|call| (call.id.as_str(), call.name.as_str()))
            .collect();

        let (system, rest) = match messages.first() {
            Some(first) if first.role == Role::System => (Some(first.joined_text()), &messages[1..]),
            _ => (None, messages),
        };

        let mut contents = Vec::new();
        for message in rest {
            match message.role {
                Role::Control => continue,
                Role::System => push_content(
                    &mut contents,
                    "user",
                    vec![json!({"text": message.joined_text()})],
                ),
                Role::User => push_content(
                    &mut contents,
                    "user",
                    message.content.iter().filter_map(Self::block_part).collect(),
                ),
                Role::Assistant => push_content(
                    &mut contents,
                    "model",
                    message.content.iter().filter_map(Self::block_part).collect(),
                ),
                Role::Tool => push_content(
                    &mut contents,
                    "user",
                    message
                        .tool_results()
                        .flat_map(|result| Self::result_parts(result, &names))
                        .collect(),
                ),
            }
        }

        if contents.is_empty() {
            return Err(FormatError::EmptyRequest);
        }

        let mut body = json!({ "contents": contents });
        if let Some(system) = system.filter(|s| !s.is_empty()) {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let mut config = serde_json::Map::new();
        if let Some(t) = options.temperature {
            config.insert("temperature".into(), json!(t));
        }
        if let Some(max_tokens) = options.max_tokens {
            config.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(top_p) = options.top_p {
            config.insert("topP".into(), json!(top_p));
        }
        if !options.stop.is_empty() {
            config.insert("stopSequences".into(), json!(options.stop));
        }
        if let Some(budget) = options.thinking_budget {
            config.insert(
                "thinkingConfig".into(),
                json!({"thinkingBudget": budget, "includeThoughts": true}),
            );
        }
        if !config.is_empty() {
            body["generationConfig"] = Value::Object(config);
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
                let mut declaration = json!({
                    "name": tool.name,
                    "description": tool.description,
                });
                if let Some(params) = self.policy.prepare(tool) {
                    declaration["parameters"] = params;
                }
                declaration
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }

    fn enable_streaming(&self, _body: &mut Value) {
        // Streaming is selected by the endpoint, not the body.
    }

    fn parse_response(&self, response: &Value) -> ChatResponse {
        let mut parser = GeminiStreamParser::default();
        parser.push(response);
        Box::new(parser).finish()
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(GeminiStreamParser::default())
    }
}

/// Accumulates `candidates[0].content.parts` across chunks. A non-streamed
/// response is parsed as a single chunk.
#[derive(Debug, Default)]
struct GeminiStreamParser {
    id: String,
    thinking: String,
    signature: Option<String>,
    text: String,
    calls: Vec<ToolUseBlock>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    block_reason: Option<String>,
    saw_candidate: bool,
}

impl GeminiStreamParser {
    fn push_part(&mut self, part: &Value, deltas: &mut Vec<StreamDelta>) {
        let signature = part[THOUGHT_SIGNATURE].as_str().map(str::to_string);

        if let Some(call) = part.get("functionCall") {
            let name = call["name"].as_str().unwrap_or_default();
            let Some(input) = object_arguments(name, &call["args"]) else {
                return;
            };
            let id = call["id"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(generate_call_id);
            let mut block = ToolUseBlock::new(id, name, input);
            if let Some(signature) = signature {
                block.metadata.insert(THOUGHT_SIGNATURE.into(), json!(signature));
            }
            deltas.push(StreamDelta::ToolCallStarted {
                id: block.id.clone(),
                name: block.name.clone(),
            });
            self.calls.push(block);
            return;
        }

        let text = part["text"].as_str().unwrap_or_default();
        if part["thought"].as_bool() == Some(true) {
            if !text.is_empty() {
                self.thinking.push_str(text);
                deltas.push(StreamDelta::Thinking { text: text.into() });
            }
        } else if !text.is_empty() {
            self.text.push_str(text);
            deltas.push(StreamDelta::Text { text: text.into() });
        }

        if signature.is_some() {
            self.signature = signature;
        }
    }
}

impl StreamParser for GeminiStreamParser {
    fn push(&mut self, chunk: &Value) -> Vec<StreamDelta> {
        let mut deltas = Vec::new();

        if let Some(id) = chunk["responseId"].as_str() {
            if self.id.is_empty() {
                self.id = id.to_string();
            }
        }
        if let Some(reason) = chunk["promptFeedback"]["blockReason"].as_str() {
            self.block_reason = Some(reason.to_string());
        }
        let usage = &chunk["usageMetadata"];
        if let Some(prompt) = usage["promptTokenCount"].as_u64() {
            let output = usage["candidatesTokenCount"].as_u64().unwrap_or(0)
                + usage["thoughtsTokenCount"].as_u64().unwrap_or(0);
            self.usage = Some(Usage::new(prompt as u32, output as u32));
        }

        let Some(candidate) = chunk["candidates"].as_array().and_then(|c| c.first()) else {
            trace!("Gemini chunk without candidates");
            return deltas;
        };
        self.saw_candidate = true;

        for part in candidate["content"]["parts"].as_array().into_iter().flatten() {
            self.push_part(part, &mut deltas);
        }

        if let Some(reason) = candidate["finishReason"].as_str() {
            self.finish_reason = Some(FinishReason::from_provider(reason));
        }

        deltas
    }

    fn is_done(&self) -> bool {
        self.finish_reason.is_some() || self.block_reason.is_some()
    }

    fn finish(self: Box<Self>) -> ChatResponse {
        let this = *self;
        let mut blocks = Vec::new();
        if !this.thinking.is_empty() || this.signature.is_some() {
            blocks.push(ContentBlock::thinking(this.thinking, this.signature));
        }
        if !this.text.is_empty() {
            blocks.push(ContentBlock::text(this.text));
        }
        blocks.extend(this.calls.into_iter().map(ContentBlock::ToolUse));

        // A lone signature carries no content of its own.
        let has_content = blocks.iter().any(|b| match b {
            ContentBlock::Thinking { thinking, .. } => !thinking.is_empty(),
            _ => true,
        });
        if !has_content {
            blocks.clear();
        }

        let block_reason = this.block_reason;
        let saw_candidate = this.saw_candidate;
        let finish_reason = match (&block_reason, this.finish_reason) {
            (Some(_), _) => FinishReason::ContentFilter,
            (None, reason) => reason.unwrap_or_default(),
        };
        if blocks.is_empty() {
            debug!(?finish_reason, "Gemini returned no usable parts");
        }
        finish_blocks(this.id, blocks, finish_reason, this.usage, move |reason| {
            match (block_reason, reason) {
                (Some(block), _) => format!("the prompt was blocked: {block}"),
                (None, _) if !saw_candidate => "no candidates in the response".into(),
                (None, FinishReason::ContentFilter) => {
                    "the response was blocked by safety filters".into()
                }
                (None, other) => format!("empty content, finish reason: {other:?}"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::wrap_schema;

    #[test]
    fn system_instruction_and_roles() {
        let body = GeminiFormatter::new()
            .format(
                &[
                    Message::system("Be terse"),
                    Message::user("Hi"),
                    Message::assistant("bot", "Hello"),
                    Message::user("Bye"),
                ],
                &GenerateOptions {
                    max_tokens: Some(64),
                    ..GenerateOptions::default()
                },
            )
            .unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be terse");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);
    }

    #[test]
    fn function_response_uses_call_name_and_replays_signature() {
        let mut call = ToolUseBlock::new("c1", "get_weather", Default::default());
        call.metadata.insert(THOUGHT_SIGNATURE.into(), json!("sig"));
        let messages = vec![
            Message::user("weather?"),
            Message::new("bot", Role::Assistant, vec![ContentBlock::ToolUse(call)]),
            Message::tool_result("bot", ToolResultBlock::text("c1", "renamed", "sunny")),
        ];
        let body = GeminiFormatter::new()
            .format(&messages, &GenerateOptions::default())
            .unwrap();
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[1]["parts"][0][THOUGHT_SIGNATURE], "sig");
        let response = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(response["name"], "get_weather");
        assert_eq!(response["response"]["output"], "sunny");
    }

    #[test]
    fn tool_declarations_are_sanitized() {
        let mut body = json!({});
        let inner = json!({"type": "object", "title": "Answer", "properties": {"city": {"type": "string", "default": "Paris"}}});
        GeminiFormatter::new().apply_tools(
            &mut body,
            &[
                ToolSchema::new("now", "", json!({"type": "object", "properties": {}})),
                ToolSchema::new("generate_response", "", wrap_schema("response", inner)),
            ],
        );
        let declarations = body["tools"][0]["functionDeclarations"].as_array().unwrap();
        assert!(declarations[0].get("parameters").is_none());
        let params = &declarations[1]["parameters"];
        assert!(params.get("title").is_none());
        assert!(params["properties"]["city"].get("default").is_none());
    }

    #[test]
    fn parse_function_call_with_signature() {
        let response = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking hard", "thought": true},
                    {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}, "thoughtSignature": "opaque"}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5}
        });
        let parsed = GeminiFormatter::new().parse_response(&response);
        assert!(matches!(parsed.content[0], ContentBlock::Thinking { .. }));
        let call = parsed.tool_uses().next().unwrap();
        assert!(call.id.starts_with("call_"));
        assert_eq!(call.metadata[THOUGHT_SIGNATURE], "opaque");
        assert_eq!(parsed.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn zero_candidates_and_blocks_are_explained() {
        let formatter = GeminiFormatter::new();
        let empty = formatter.parse_response(&json!({"candidates": []}));
        assert!(empty.content[0].as_text().unwrap().contains("no candidates"));

        let blocked = formatter.parse_response(&json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        assert_eq!(blocked.finish_reason, FinishReason::ContentFilter);
        assert!(blocked.content[0].as_text().unwrap().contains("blocked"));

        let safety = formatter.parse_response(&json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
        }));
        assert!(safety.content[0].as_text().unwrap().contains("safety"));
    }

    #[test]
    fn stream_chunks_accumulate() {
        let mut parser = GeminiFormatter::new().stream_parser();
        parser.push(&json!({"candidates": [{"content": {"parts": [{"text": "Hel"}]}}]}));
        assert!(!parser.is_done());
        parser.push(&json!({"candidates": [{"content": {"parts": [{"text": "lo"}]}, "finishReason": "STOP"}]}));
        assert!(parser.is_done());
        let response = parser.finish();
        assert_eq!(response.content[0].as_text(), Some("Hello"));
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }
}
