//! Tool schema preparation per provider.
//!
//! Providers disagree on which JSON-Schema features they accept. A
//! [`SchemaPolicy`] captures one provider's rules: how to treat a parameter
//! object with no properties, whether to unwrap the structured-output wrapper
//! and which metadata keywords to strip.

use reagent_core::ToolSchema;
use serde_json::{Map, Value, json};

/// Marks the single-property wrapper used to force structured output through
/// the tool channel. Never transmitted.
pub const WRAPPER_MARKER: &str = "x-reagent-wrapper";

/// Maximum `$ref` nesting inlined before giving up.
const MAX_REF_DEPTH: usize = 16;

/// What to send for a tool whose parameters declare no properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyParameters {
    /// Send the schema as-is
    #[default]
    Keep,
    /// Leave the parameters field out of the declaration
    Omit,
    /// Send a bare `{"type": "object"}`
    PlainObject,
}

/// One provider's schema rules.
#[derive(Debug, Clone, Default)]
pub struct SchemaPolicy {
    pub empty_parameters: EmptyParameters,
    pub unwrap_wrapper: bool,
    /// Inline local `$ref`s and drop `$defs` for providers without reference support
    pub inline_refs: bool,
    /// Keywords removed recursively from every sub-schema
    pub strip_keys: Vec<&'static str>,
}

impl SchemaPolicy {
    pub fn openai() -> Self {
        Self {
            empty_parameters: EmptyParameters::Omit,
            unwrap_wrapper: false,
            inline_refs: false,
            strip_keys: vec!["$schema", "$id"],
        }
    }

    pub fn anthropic() -> Self {
        Self {
            empty_parameters: EmptyParameters::PlainObject,
            unwrap_wrapper: false,
            inline_refs: false,
            strip_keys: vec!["$schema", "$id"],
        }
    }

    pub fn dashscope() -> Self {
        Self {
            empty_parameters: EmptyParameters::Omit,
            unwrap_wrapper: true,
            inline_refs: false,
            strip_keys: vec!["$schema", "$id", "title"],
        }
    }

    pub fn gemini() -> Self {
        Self {
            empty_parameters: EmptyParameters::Omit,
            unwrap_wrapper: true,
            inline_refs: true,
            strip_keys: vec![
                "$schema",
                "$id",
                "title",
                "default",
                "nullable",
                "additionalProperties",
                "examples",
                "$comment",
            ],
        }
    }

    /// The parameters to transmit for `schema`, or `None` to omit the field.
    pub fn prepare(&self, schema: &ToolSchema) -> Option<Value> {
        let mut params = match &schema.parameters {
            Value::Null => json!({"type": "object", "properties": {}}),
            other => other.clone(),
        };

        if self.unwrap_wrapper {
            params = unwrap_wrapper(params);
        }

        if self.inline_refs {
            let defs = take_defs(&mut params);
            if !defs.is_empty() {
                inline_refs(&mut params, &defs, 0);
            }
        }

        strip(&mut params, &self.strip_keys);

        if is_empty_object_schema(&params) {
            return match self.empty_parameters {
                EmptyParameters::Keep => Some(params),
                EmptyParameters::Omit => None,
                EmptyParameters::PlainObject => Some(json!({"type": "object"})),
            };
        }

        Some(params)
    }
}

/// Build the wrapper schema around `inner` under `property`.
pub fn wrap_schema(property: &str, inner: Value) -> Value {
    json!({
        "type": "object",
        "properties": { property: inner },
        "required": [property],
        WRAPPER_MARKER: true,
    })
}

/// Whether `params` is a marked single-property wrapper.
pub fn is_wrapper(params: &Value) -> bool {
    params.get(WRAPPER_MARKER).and_then(Value::as_bool) == Some(true)
        && params
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|p| p.len() == 1)
}

/// Replace a wrapper by its inner object schema. Non-object inner schemas
/// cannot be function parameters, so the wrapper is kept for them.
fn unwrap_wrapper(params: Value) -> Value {
    if !is_wrapper(&params) {
        return params;
    }
    let inner = params
        .get("properties")
        .and_then(Value::as_object)
        .and_then(|p| p.values().next())
        .cloned();
    match inner {
        Some(inner) if inner.get("type").and_then(Value::as_str) == Some("object") => {
            let mut inner = inner;
            // Definitions referenced by the inner schema live on the wrapper.
            for key in ["$defs", "definitions"] {
                if let (Some(defs), Value::Object(obj)) = (params.get(key), &mut inner) {
                    obj.entry(key.to_string()).or_insert_with(|| defs.clone());
                }
            }
            inner
        }
        _ => params,
    }
}

fn is_empty_object_schema(params: &Value) -> bool {
    match params {
        Value::Object(obj) => match obj.get("properties") {
            None => obj.len() <= 1 && obj.get("type").is_none_or(|t| t == "object"),
            Some(Value::Object(props)) => props.is_empty(),
            Some(_) => false,
        },
        _ => false,
    }
}

fn take_defs(params: &mut Value) -> Map<String, Value> {
    let mut defs = Map::new();
    if let Value::Object(obj) = params {
        for key in ["$defs", "definitions"] {
            if let Some(Value::Object(d)) = obj.remove(key) {
                defs.extend(d);
            }
        }
    }
    defs
}

fn inline_refs(value: &mut Value, defs: &Map<String, Value>, depth: usize) {
    match value {
        Value::Object(obj) => {
            if let Some(Value::String(reference)) = obj.get("$ref") {
                let name = reference
                    .rsplit('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if depth < MAX_REF_DEPTH {
                    if let Some(target) = defs.get(&name) {
                        let mut replacement = target.clone();
                        inline_refs(&mut replacement, defs, depth + 1);
                        obj.remove("$ref");
                        if let Value::Object(fields) = replacement {
                            for (k, v) in fields {
                                obj.entry(k).or_insert(v);
                            }
                        }
                        return;
                    }
                }
            }
            for v in obj.values_mut() {
                inline_refs(v, defs, depth);
            }
        }
        Value::Array(items) => {
            for v in items {
                inline_refs(v, defs, depth);
            }
        }
        _ => {}
    }
}

/// Remove `keys` (and the wrapper marker) from a schema and every nested sub-schema.
fn strip(schema: &mut Value, keys: &[&str]) {
    let Value::Object(obj) = schema else {
        return;
    };

    obj.remove(WRAPPER_MARKER);
    for key in keys {
        obj.remove(*key);
    }

    // `properties` and `$defs` map names to schemas; the names themselves are
    // never keywords.
    for key in ["properties", "$defs", "definitions", "patternProperties"] {
        if let Some(Value::Object(children)) = obj.get_mut(key) {
            for child in children.values_mut() {
                strip(child, keys);
            }
        }
    }

    for key in ["items", "additionalProperties", "not"] {
        match obj.get_mut(key) {
            Some(Value::Array(children)) => {
                for child in children {
                    strip(child, keys);
                }
            }
            Some(child @ Value::Object(_)) => strip(child, keys),
            _ => {}
        }
    }

    for key in ["anyOf", "oneOf", "allOf", "prefixItems"] {
        if let Some(Value::Array(children)) = obj.get_mut(key) {
            for child in children {
                strip(child, keys);
            }
        }
    }
}
