//! Helpers shared by every response parser.

use std::collections::BTreeMap;

use reagent_core::message::{ContentBlock, ToolUseBlock};
use reagent_core::provider::{ChatResponse, FinishReason, StreamDelta, Usage};
use serde_json::{Map, Value};
use tracing::warn;

/// Parse a tool call's raw argument text.
///
/// An empty string means "no arguments". Anything that is not a JSON object
/// is logged and rejected, so the caller skips that single call.
pub(crate) fn parse_arguments(tool: &str, raw: &str) -> Option<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Some(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) => {
            warn!(tool, arguments = %other, "Tool arguments are not a JSON object, skipping call");
            None
        }
        Err(e) => {
            warn!(tool, arguments = raw, error = %e, "Malformed tool arguments, skipping call");
            None
        }
    }
}

/// Accept an already-decoded argument value if it is an object.
pub(crate) fn object_arguments(tool: &str, value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::Null => Some(Map::new()),
        Value::String(raw) => parse_arguments(tool, raw),
        other => {
            warn!(tool, arguments = %other, "Tool arguments are not a JSON object, skipping call");
            None
        }
    }
}

/// Fresh call ID for providers that do not issue one.
pub(crate) fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Text used when a provider returns nothing usable.
pub(crate) fn no_response_text(detail: &str) -> String {
    format!("The model returned no response ({detail}).")
}

/// Build the final response, substituting an explanation for empty content.
pub(crate) fn finish_blocks(
    id: String,
    blocks: Vec<ContentBlock>,
    finish_reason: FinishReason,
    usage: Option<Usage>,
    empty_detail: impl FnOnce(&FinishReason) -> String,
) -> ChatResponse {
    if blocks.is_empty() {
        let detail = empty_detail(&finish_reason);
        let mut resp = ChatResponse::explanation(no_response_text(&detail), finish_reason);
        resp.id = id;
        resp.usage = usage;
        return resp;
    }
    ChatResponse::new(id, blocks, finish_reason, usage)
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles indexed tool-call fragments from a stream.
///
/// Argument text is only concatenated while streaming and parsed once, in
/// [`ToolCallAccumulator::finish`].
#[derive(Debug, Default)]
pub(crate) struct ToolCallAccumulator {
    calls: BTreeMap<u64, PartialToolCall>,
    last_index: Option<u64>,
}

impl ToolCallAccumulator {
    /// Pick the slot for a fragment. Providers that omit `index` start a new
    /// slot whenever a new call ID appears.
    pub(crate) fn resolve_index(&self, index: Option<u64>, id: Option<&str>) -> u64 {
        if let Some(index) = index {
            return index;
        }
        match (self.last_index, id.filter(|s| !s.is_empty())) {
            (None, _) => 0,
            (Some(last), Some(id)) => match self.calls.get(&last) {
                Some(call) if !call.id.is_empty() && call.id != id => last + 1,
                _ => last,
            },
            (Some(last), None) => last,
        }
    }

    /// Merge one fragment. Returns a start delta the first time a call's name is seen.
    pub(crate) fn push(
        &mut self,
        index: u64,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Option<StreamDelta> {
        self.last_index = Some(index);
        let call = self.calls.entry(index).or_default();

        if let Some(id) = id.filter(|s| !s.is_empty()) {
            if call.id.is_empty() {
                call.id = id.to_string();
            }
        }

        let mut started = None;
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            if call.name.is_empty() {
                call.name = name.to_string();
                started = Some(StreamDelta::ToolCallStarted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                });
            }
        }

        if let Some(args) = arguments {
            call.arguments.push_str(args);
        }

        started
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Parse every accumulated call, in index order.
    pub(crate) fn finish(self) -> Vec<ContentBlock> {
        self.calls
            .into_values()
            .filter_map(|call| {
                if call.name.is_empty() {
                    warn!(id = %call.id, "Tool call fragment without a name, skipping");
                    return None;
                }
                let input = parse_arguments(&call.name, &call.arguments)?;
                let id = if call.id.is_empty() {
                    generate_call_id()
                } else {
                    call.id
                };
                Some(ContentBlock::ToolUse(ToolUseBlock::new(id, call.name, input)))
            })
            .collect()
    }
}
