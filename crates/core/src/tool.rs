//! Tool contract types shared by the tool engine, formatters and hooks.

use serde::{Deserialize, Serialize};

use crate::message::ContentBlock;

/// Tool declaration as the model sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name, unique within one request
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for the parameters (an `object` schema, possibly empty)
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// True when the schema declares no properties at all.
    pub fn has_empty_parameters(&self) -> bool {
        match &self.parameters {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => match map.get("properties") {
                None => true,
                Some(serde_json::Value::Object(props)) => props.is_empty(),
                Some(_) => false,
            },
            _ => false,
        }
    }

    /// Names of the declared top-level properties.
    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// A partial result streamed by a tool before it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChunk {
    /// The tool call producing the chunk
    pub tool_use_id: String,

    /// Progress content
    pub content: Vec<ContentBlock>,
}
