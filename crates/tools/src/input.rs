//! What a tool receives when it is invoked.
//!
//! Parameters resolve in rank order: arguments supplied by the model, then
//! preset values bound at registration, then context objects matched by type.
//! The context only fills parameters declared as context-injected.

use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use reagent_core::{AgentRef, ContentBlock, ToolChunk, ToolError};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Objects available to tools by type rather than by name.
#[derive(Clone, Default)]
pub struct ToolContext {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value; replaces any earlier value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.values
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("entries", &self.values.len())
            .finish()
    }
}

/// Handle for streaming partial results before a tool returns.
#[derive(Debug, Clone)]
pub struct ToolEmitter {
    tool_use_id: String,
    tx: mpsc::UnboundedSender<ToolChunk>,
}

impl ToolEmitter {
    pub fn new(tool_use_id: impl Into<String>, tx: mpsc::UnboundedSender<ToolChunk>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            tx,
        }
    }

    /// Emitter plus the receiving end, for callers that drain chunks themselves.
    pub fn channel(tool_use_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ToolChunk>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tool_use_id, tx), rx)
    }

    /// Send a progress chunk. Returns false once nobody is listening.
    pub fn emit(&self, content: Vec<ContentBlock>) -> bool {
        self.tx
            .send(ToolChunk {
                tool_use_id: self.tool_use_id.clone(),
                content,
            })
            .is_ok()
    }

    pub fn emit_text(&self, text: impl Into<String>) -> bool {
        self.emit(vec![ContentBlock::text(text)])
    }

    pub fn tool_use_id(&self) -> &str {
        &self.tool_use_id
    }
}

/// One invocation's arguments and injected collaborators.
#[derive(Clone)]
pub struct ToolInput {
    pub call_id: String,
    pub tool_name: String,
    args: Map<String, Value>,
    preset: Map<String, Value>,
    context: ToolContext,
    context_params: BTreeSet<String>,
    emitter: Option<ToolEmitter>,
    agent: Option<Arc<dyn AgentRef>>,
}

impl ToolInput {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            args,
            preset: Map::new(),
            context: ToolContext::default(),
            context_params: BTreeSet::new(),
            emitter: None,
            agent: None,
        }
    }

    pub fn with_preset(mut self, preset: Map<String, Value>) -> Self {
        self.preset = preset;
        self
    }

    pub fn with_context(mut self, context: ToolContext) -> Self {
        self.context = context;
        self
    }

    /// Parameters the context may fill when neither the model nor a preset did.
    pub fn with_context_params(mut self, names: BTreeSet<String>) -> Self {
        self.context_params = names;
        self
    }

    pub fn with_emitter(mut self, emitter: ToolEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_agent(mut self, agent: Arc<dyn AgentRef>) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Arguments exactly as the model supplied them.
    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    /// Preset values overlaid by model arguments.
    pub fn merged_args(&self) -> Map<String, Value> {
        let mut merged = self.preset.clone();
        for (k, v) in &self.args {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Highest-ranked JSON value for `name`, if the model or a preset supplied one.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name).or_else(|| self.preset.get(name))
    }

    /// Resolve parameter `name`: model argument, then preset, then a context
    /// object of type `T` when `name` is context-injected.
    pub fn resolve<T>(&self, name: &str) -> Result<T, ToolError>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        if let Some(value) = self.get(name) {
            return serde_json::from_value(value.clone()).map_err(|e| {
                ToolError::InvalidArguments(format!("{}: parameter '{name}': {e}", self.tool_name))
            });
        }
        if self.context_params.contains(name) {
            if let Some(value) = self.context.get::<T>() {
                return Ok(value.as_ref().clone());
            }
        }
        Err(ToolError::InvalidArguments(format!(
            "{}: missing parameter '{name}'",
            self.tool_name
        )))
    }

    /// Context object of type `T`.
    pub fn context<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.context.get::<T>()
    }

    pub fn emitter(&self) -> Option<&ToolEmitter> {
        self.emitter.as_ref()
    }

    /// The agent that invoked this tool.
    pub fn agent(&self) -> Option<Arc<dyn AgentRef>> {
        self.agent.clone()
    }
}

impl std::fmt::Debug for ToolInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInput")
            .field("call_id", &self.call_id)
            .field("tool_name", &self.tool_name)
            .field("args", &self.args)
            .field("preset", &self.preset.keys().collect::<Vec<_>>())
            .field("context_params", &self.context_params)
            .field("has_emitter", &self.emitter.is_some())
            .field("has_agent", &self.agent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn model_args_beat_presets_beat_context() {
        let mut context = ToolContext::new();
        context.insert(String::from("from-context"));

        let input = ToolInput::new("c1", "t", map(json!({"city": "Paris"})))
            .with_preset(map(json!({"city": "Berlin", "unit": "celsius"})))
            .with_context(context)
            .with_context_params(["city", "session"].map(String::from).into());

        assert_eq!(input.resolve::<String>("city").unwrap(), "Paris");
        assert_eq!(input.resolve::<String>("unit").unwrap(), "celsius");
        assert_eq!(input.resolve::<String>("session").unwrap(), "from-context");
        assert!(input.resolve::<u32>("session").is_err());
        assert_eq!(input.merged_args()["city"], "Paris");
    }

    #[test]
    fn context_never_fills_undeclared_parameters() {
        let mut context = ToolContext::new();
        context.insert(String::from("from-context"));

        let input = ToolInput::new("c1", "t", Map::new()).with_context(context);
        let err = input.resolve::<String>("text").unwrap_err();
        assert!(err.to_string().contains("missing parameter 'text'"));
    }

    #[test]
    fn wrong_type_is_invalid_arguments() {
        let input = ToolInput::new("c1", "t", map(json!({"n": "three"})));
        let err = input.resolve::<u32>("n").unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[derive(Debug, PartialEq)]
    struct Db(&'static str);

    #[test]
    fn context_lookup_by_type() {
        let mut context = ToolContext::new();
        context.insert(Db("main"));
        context.insert(42u64);
        assert_eq!(context.get::<Db>().unwrap().0, "main");
        assert_eq!(*context.get::<u64>().unwrap(), 42);
        assert!(context.get::<i32>().is_none());
    }

    #[tokio::test]
    async fn emitter_tags_chunks_with_call_id() {
        let (emitter, mut rx) = ToolEmitter::channel("call_9");
        assert!(emitter.emit_text("50%"));
        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.tool_use_id, "call_9");
        assert_eq!(chunk.content[0].as_text(), Some("50%"));
        drop(rx);
        assert!(!emitter.emit_text("lost"));
    }
}
