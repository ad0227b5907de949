//! The toolkit: registration, tool groups and execution.
//!
//! Tools live in named groups that are switched on and off explicitly. Only
//! tools in active groups are offered to the model or resolvable by name.
//! Execution never fails: unknown tools, argument errors, timeouts and panics
//! all become error-flagged result blocks.

use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use reagent_core::{AgentRef, ToolChunk, ToolError, ToolResultBlock, ToolSchema, ToolUseBlock};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::function::ToolFunction;
use crate::input::{ToolContext, ToolEmitter, ToolInput};

/// Group every tool belongs to unless registered elsewhere. Active by default.
pub const BASIC_GROUP: &str = "basic";

/// Registration options.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistration {
    /// Target group; `None` means [`BASIC_GROUP`]
    pub group: Option<String>,
    /// Values injected at call time and hidden from the model's schema
    pub preset: Map<String, Value>,
    /// Parameters the toolkit context may fill by type
    pub context_params: BTreeSet<String>,
}

impl ToolRegistration {
    pub fn in_group(group: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            ..Self::default()
        }
    }

    pub fn with_preset(mut self, key: impl Into<String>, value: Value) -> Self {
        self.preset.insert(key.into(), value);
        self
    }

    pub fn with_context_param(mut self, name: impl Into<String>) -> Self {
        self.context_params.insert(name.into());
        self
    }
}

#[derive(Debug, Clone)]
struct ToolGroup {
    description: String,
    active: bool,
}

struct Registered {
    tool: Arc<dyn ToolFunction>,
    name: String,
    group: String,
    preset: Map<String, Value>,
    context_params: BTreeSet<String>,
}

/// Collaborators passed to every tool of one acting phase.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    /// Where tool progress chunks go
    pub chunks: Option<mpsc::UnboundedSender<ToolChunk>>,
    /// The invoking agent
    pub agent: Option<Arc<dyn AgentRef>>,
}

/// Registry and executor for an agent's tools.
pub struct Toolkit {
    tools: Vec<Registered>,
    groups: HashMap<String, ToolGroup>,
    context: ToolContext,
    timeout: Option<Duration>,
}

impl Default for Toolkit {
    fn default() -> Self {
        Self::new()
    }
}

impl Toolkit {
    pub fn new() -> Self {
        let mut groups = HashMap::new();
        groups.insert(
            BASIC_GROUP.to_string(),
            ToolGroup {
                description: "Always-available tools".into(),
                active: true,
            },
        );
        Self {
            tools: Vec::new(),
            groups,
            context: ToolContext::new(),
            timeout: None,
        }
    }

    /// Limit every tool call to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Make `value` available to tools by type.
    pub fn insert_context<T: Send + Sync + 'static>(&mut self, value: T) {
        self.context.insert(value);
    }

    /// Register a tool in the basic group.
    pub fn register(&mut self, tool: impl ToolFunction + 'static) -> Result<(), ToolError> {
        self.register_with(Arc::new(tool), ToolRegistration::default())
    }

    pub fn register_with(
        &mut self,
        tool: Arc<dyn ToolFunction>,
        registration: ToolRegistration,
    ) -> Result<(), ToolError> {
        let name = tool.schema().name;
        if self.tools.iter().any(|t| t.name == name) {
            return Err(ToolError::Duplicate(name));
        }
        let group = registration.group.unwrap_or_else(|| BASIC_GROUP.to_string());
        if !self.groups.contains_key(&group) {
            return Err(ToolError::UnknownGroup(group));
        }
        debug!(tool = %name, group = %group, "Registered tool");
        self.tools.push(Registered {
            tool,
            name,
            group,
            preset: registration.preset,
            context_params: registration.context_params,
        });
        Ok(())
    }

    /// Remove a tool; returns whether it existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.tools.len();
        self.tools.retain(|t| t.name != name);
        self.tools.len() != before
    }

    pub fn create_group(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        active: bool,
    ) -> Result<(), ToolError> {
        let name = name.into();
        if self.groups.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.groups.insert(
            name,
            ToolGroup {
                description: description.into(),
                active,
            },
        );
        Ok(())
    }

    /// Add `names` to the active set. Fails without changes if any is unknown.
    pub fn activate_groups(&mut self, names: &[&str]) -> Result<(), ToolError> {
        self.set_groups(names, true)
    }

    /// Remove `names` from the active set. Fails without changes if any is unknown.
    pub fn deactivate_groups(&mut self, names: &[&str]) -> Result<(), ToolError> {
        self.set_groups(names, false)
    }

    fn set_groups(&mut self, names: &[&str], active: bool) -> Result<(), ToolError> {
        if let Some(unknown) = names.iter().find(|n| !self.groups.contains_key(**n)) {
            return Err(ToolError::UnknownGroup(unknown.to_string()));
        }
        for name in names {
            if let Some(group) = self.groups.get_mut(*name) {
                group.active = active;
            }
        }
        info!(groups = ?names, active, "Tool groups switched");
        Ok(())
    }

    /// Names of the active groups, sorted.
    pub fn active_groups(&self) -> Vec<String> {
        self.groups
            .iter()
            .filter(|(_, g)| g.active)
            .map(|(name, _)| name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Description of every group, active or not, sorted by name.
    pub fn group_descriptions(&self) -> Vec<(String, String, bool)> {
        let mut groups: Vec<_> = self
            .groups
            .iter()
            .map(|(name, g)| (name.clone(), g.description.clone(), g.active))
            .collect();
        groups.sort();
        groups
    }

    fn is_active(&self, tool: &Registered) -> bool {
        self.groups.get(&tool.group).is_some_and(|g| g.active)
    }

    fn find(&self, name: &str) -> Option<&Registered> {
        self.tools
            .iter()
            .find(|t| t.name == name && self.is_active(t))
    }

    /// Schemas of the tools in active groups, in registration order, with
    /// preset parameters removed.
    pub fn available_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .filter(|t| self.is_active(t))
            .map(|t| hide_presets(t.tool.schema(), &t.preset))
            .collect()
    }

    /// Look up an active tool by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ToolFunction>> {
        self.find(name).map(|t| t.tool.clone())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute one tool call. Never fails; errors become error-flagged results.
    pub async fn execute(&self, call: &ToolUseBlock, ctx: &ExecutionContext) -> ToolResultBlock {
        let Some(entry) = self.find(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown or inactive tool");
            return ToolResultBlock::error(&call.id, &call.name, ToolError::NotFound(call.name.clone()).to_string());
        };

        let mut input = ToolInput::new(&call.id, &call.name, call.input.clone())
            .with_preset(entry.preset.clone())
            .with_context(self.context.clone())
            .with_context_params(entry.context_params.clone());
        if let Some(tx) = &ctx.chunks {
            input = input.with_emitter(ToolEmitter::new(&call.id, tx.clone()));
        }
        if let Some(agent) = &ctx.agent {
            input = input.with_agent(agent.clone());
        }

        debug!(tool = %call.name, call_id = %call.id, "Executing tool");
        let invocation = AssertUnwindSafe(entry.tool.call(input)).catch_unwind();

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: limit.as_secs(),
                })),
            },
            None => invocation.await,
        };

        match outcome {
            Ok(Ok(ret)) => ret.into_result(&call.id, &call.name),
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "Tool failed");
                ToolResultBlock::error(&call.id, &call.name, e.to_string())
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".into());
                warn!(tool = %call.name, reason = %reason, "Tool panicked");
                ToolResultBlock::error(&call.id, &call.name, ToolError::failed(&call.name, reason).to_string())
            }
        }
    }

    /// Execute several calls, concurrently when `parallel`. Results keep the
    /// order of `calls`.
    pub async fn execute_all(
        &self,
        calls: &[ToolUseBlock],
        parallel: bool,
        ctx: &ExecutionContext,
    ) -> Vec<ToolResultBlock> {
        if parallel {
            return join_all(calls.iter().map(|call| self.execute(call, ctx))).await;
        }
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call, ctx).await);
        }
        results
    }
}

/// Drop preset keys from a schema's `properties` and `required`.
fn hide_presets(mut schema: ToolSchema, preset: &Map<String, Value>) -> ToolSchema {
    if preset.is_empty() {
        return schema;
    }
    if let Some(props) = schema
        .parameters
        .get_mut("properties")
        .and_then(Value::as_object_mut)
    {
        props.retain(|k, _| !preset.contains_key(k));
    }
    if let Some(required) = schema
        .parameters
        .get_mut("required")
        .and_then(Value::as_array_mut)
    {
        required.retain(|k| k.as_str().is_none_or(|k| !preset.contains_key(k)));
    }
    schema
}
