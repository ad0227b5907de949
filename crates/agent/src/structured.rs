//! Structured output through the tool-call channel.
//!
//! The caller's JSON schema is wrapped in a single `response` property and
//! exposed as the `generate_response` tool. Formatters unwrap the wrapper for
//! providers that reject it; the model then sends the caller's fields directly.

use reagent_core::{ToolError, ToolUseBlock};
use reagent_providers::wrap_schema;
use reagent_tools::{FnTool, ToolInput};
use serde_json::Value;

/// Name of the tool the model calls to deliver its final answer.
pub const GENERATE_RESPONSE: &str = "generate_response";

/// Property wrapping the caller's schema.
pub const RESPONSE_PROPERTY: &str = "response";

/// Metadata key holding the structured value on the final message.
pub const STRUCTURED_OUTPUT_KEY: &str = "structured_output";

pub(crate) const STRUCTURED_REMINDER: &str =
    "You must call the generate_response tool to provide your final response.";

const GENERATED: &str = "Successfully generated response.";

/// Build the `generate_response` tool for `schema`.
///
/// `wrapped` is false when the formatter sends the caller's schema unwrapped.
pub(crate) fn response_tool(schema: Value, wrapped: bool) -> FnTool {
    let required: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    FnTool::new(
        GENERATE_RESPONSE,
        "Generate the final response to the user. Call this tool once you have the answer.",
        wrap_schema(RESPONSE_PROPERTY, schema),
        move |input: ToolInput| {
            let required = required.clone();
            async move {
                let value = response_value(input.merged_args(), wrapped);
                let missing: Vec<&str> = required
                    .iter()
                    .filter(|key| value.get(key.as_str()).is_none())
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(ToolError::InvalidArguments(format!(
                        "{GENERATE_RESPONSE}: missing required fields: {}",
                        missing.join(", ")
                    )));
                }
                Ok(GENERATED)
            }
        },
    )
}

/// The structured value carried by a `generate_response` call.
pub(crate) fn extract(call: &ToolUseBlock, wrapped: bool) -> Value {
    response_value(call.input.clone(), wrapped)
}

fn response_value(mut args: serde_json::Map<String, Value>, wrapped: bool) -> Value {
    if !wrapped {
        return Value::Object(args);
    }
    match args.remove(RESPONSE_PROPERTY) {
        Some(value) => value,
        None => Value::Object(args),
    }
}
