//! DashScope (Qwen) generation API format adapter.
//!
//! Request body: `{input: {messages}, parameters: {result_format: "message", ...}}`.
//! Text-only messages send `content` as a string; messages with media use
//! the multimodal list form `[{text}, {image}, {audio}, {video}]`, which the
//! transport routes to the multimodal endpoint.

use reagent_core::message::{ContentBlock, Message, Role};
use reagent_core::provider::{
    ChatResponse, FinishReason, Formatter, GenerateOptions, StreamParser,
};
use reagent_core::{FormatError, ToolSchema};
use serde_json::{Value, json};
use tracing::warn;

use crate::media;
use crate::openai::{ChoiceStreamParser, blocks_from_message, empty_detail, parse_usage};
use crate::response::finish_blocks;
use crate::schema::SchemaPolicy;

/// Formatter for the DashScope text and multimodal generation APIs.
#[derive(Debug, Clone)]
pub struct DashScopeFormatter {
    policy: SchemaPolicy,
}

impl Default for DashScopeFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl DashScopeFormatter {
    pub fn new() -> Self {
        Self {
            policy: SchemaPolicy::dashscope(),
        }
    }

    fn has_media(message: &Message) -> bool {
        message.content.iter().any(|b| {
            matches!(
                b,
                ContentBlock::Image { .. } | ContentBlock::Audio { .. } | ContentBlock::Video { .. }
            )
        })
    }

    fn content(message: &Message) -> Value {
        if !Self::has_media(message) {
            return json!(message.joined_text());
        }
        let parts: Vec<Value> = message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(json!({"text": text})),
                ContentBlock::Image { source } => Some(json!({"image": media::to_url(source)})),
                ContentBlock::Audio { source } => Some(json!({"audio": media::to_url(source)})),
                ContentBlock::Video { source } => Some(json!({"video": media::to_url(source)})),
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
        let mut entry = json!({"role": "assistant", "content": text});
        if !tool_calls.is_empty() {
            entry["tool_calls"] = json!(tool_calls);
        }
        Some(entry)
    }
}

/// Whether a formatted body needs the multimodal endpoint.
pub fn uses_multimodal(body: &Value) -> bool {
    body["input"]["messages"]
        .as_array()
        .is_some_and(|entries| entries.iter().any(|e| e["content"].is_array()))
}

impl Formatter for DashScopeFormatter {
    fn name(&self) -> &str {
        "dashscope"
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
                    if !message.content.is_empty() {
                        entries.push(json!({"role": "user", "content": Self::content(message)}));
                    }
                }
                Role::Assistant => {
                    if let Some(entry) = Self::assistant_entry(message) {
                        entries.push(entry);
                    }
                }
                Role::Tool => {
                    for result in message.tool_results() {
                        if result.output.iter().any(|b| !matches!(b, ContentBlock::Text { .. })) {
                            warn!(
                                provider = "dashscope",
                                tool = %result.name,
                                "Non-text tool output is sent as text only"
                            );
                        }
                        entries.push(json!({
                            "role": "tool",
                            "tool_call_id": result.id,
                            "name": result.name,
                            "content": result.output_text(),
                        }));
                    }
                }
            }
        }

        if entries.is_empty() {
            return Err(FormatError::EmptyRequest);
        }

        // Once any entry uses list content, the multimodal API wants all of them to.
        if entries.iter().any(|e| e["content"].is_array()) {
            for entry in &mut entries {
                if let Some(text) = entry["content"].as_str().map(str::to_string) {
                    entry["content"] = json!([{"text": text}]);
                }
            }
        }

        let mut parameters = json!({"result_format": "message"});
        if let Some(t) = options.temperature {
            parameters["temperature"] = json!(t);
        }
        if let Some(max_tokens) = options.max_tokens {
            parameters["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = options.top_p {
            parameters["top_p"] = json!(top_p);
        }
        if !options.stop.is_empty() {
            parameters["stop"] = json!(options.stop);
        }
        if let Some(budget) = options.thinking_budget {
            parameters["enable_thinking"] = json!(true);
            parameters["thinking_budget"] = json!(budget);
        }

        Ok(json!({
            "input": {"messages": entries},
            "parameters": parameters,
        }))
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
        body["parameters"]["tools"] = json!(declarations);
    }

    fn enable_streaming(&self, body: &mut Value) {
        body["parameters"]["incremental_output"] = json!(true);
    }

    fn parse_response(&self, response: &Value) -> ChatResponse {
        let id = response["request_id"].as_str().unwrap_or_default().to_string();
        let usage = parse_usage(&response["usage"]);
        let output = &response["output"];

        // Legacy `result_format: text` responses
        if let Some(text) = output["text"].as_str() {
            let reason = output["finish_reason"]
                .as_str()
                .map(FinishReason::from_provider)
                .unwrap_or_default();
            let blocks = if text.is_empty() {
                vec![]
            } else {
                vec![ContentBlock::text(text)]
            };
            return finish_blocks(id, blocks, reason, usage, empty_detail);
        }

        let Some(choice) = output["choices"].as_array().and_then(|c| c.first()) else {
            return finish_blocks(id, vec![], FinishReason::Unknown, usage, |_| {
                "no choices in the response".into()
            });
        };

        let reason = choice["finish_reason"]
            .as_str()
            .map(FinishReason::from_provider)
            .unwrap_or_default();
        let blocks = blocks_from_message(&choice["message"]);
        finish_blocks(id, blocks, reason, usage, empty_detail)
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        Box::new(ChoiceStreamParser::for_dashscope())
    }
}
