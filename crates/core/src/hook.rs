//! Hook chain: priority-ordered interceptors threaded through the ReAct loop.
//!
//! Every lifecycle point of a `call` fires a [`HookEvent`]. Mutable events
//! borrow their payload mutably, so handlers may edit it in place; notification
//! events only hand out shared references, so a handler cannot change them.
//!
//! Handlers run strictly one after the other in priority order (lower first,
//! FIFO for equal priority). The first handler error aborts the chain.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::HookError;
use crate::message::{Message, ToolResultBlock, ToolUseBlock};
use crate::provider::StreamDelta;
use crate::tool::{ToolChunk, ToolSchema};

/// The loop stage an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    Call,
    Reasoning,
    Acting,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => write!(f, "call"),
            Self::Reasoning => write!(f, "reasoning"),
            Self::Acting => write!(f, "acting"),
        }
    }
}

// --- Payloads ---

/// Fired once when `call` starts. Notification only.
#[derive(Debug, Clone)]
pub struct PreCall {
    pub agent: String,
    pub input: Vec<Message>,
}

/// Fired once when `call` finishes. The final message may be replaced.
#[derive(Debug, Clone)]
pub struct PostCall {
    pub agent: String,
    pub message: Message,
}

/// Fired before each model call. The outbound list may be replaced.
#[derive(Debug, Clone)]
pub struct PreReasoning {
    pub agent: String,
    pub iteration: u32,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// Fired after each model call. The parsed response may be replaced.
#[derive(Debug, Clone)]
pub struct PostReasoning {
    pub agent: String,
    pub iteration: u32,
    pub message: Message,
}

/// One streamed delta from the model. Notification only.
#[derive(Debug, Clone)]
pub struct ReasoningChunk {
    pub agent: String,
    pub delta: StreamDelta,
}

/// Fired before each tool call. The call may be altered.
#[derive(Debug, Clone)]
pub struct PreActing {
    pub agent: String,
    pub iteration: u32,
    pub tool_use: ToolUseBlock,
}

/// Fired after each tool call. The result may be altered before storage.
#[derive(Debug, Clone)]
pub struct PostActing {
    pub agent: String,
    pub iteration: u32,
    pub tool_use: ToolUseBlock,
    pub result: ToolResultBlock,
}

/// Tool progress output. Notification only.
#[derive(Debug, Clone)]
pub struct ActingChunk {
    pub agent: String,
    pub tool_name: String,
    pub chunk: ToolChunk,
}

/// A failure surfaced by the loop. Notification only.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub agent: String,
    pub phase: HookPhase,
    pub error: String,
}

/// An event passed through the chain.
#[derive(Debug)]
pub enum HookEvent<'a> {
    PreCall(&'a PreCall),
    PostCall(&'a mut PostCall),
    PreReasoning(&'a mut PreReasoning),
    PostReasoning(&'a mut PostReasoning),
    ReasoningChunk(&'a ReasoningChunk),
    PreActing(&'a mut PreActing),
    PostActing(&'a mut PostActing),
    ActingChunk(&'a ActingChunk),
    Error(&'a ErrorEvent),
}

impl HookEvent<'_> {
    /// Stable event name, e.g. `"pre_reasoning"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PreCall(_) => "pre_call",
            Self::PostCall(_) => "post_call",
            Self::PreReasoning(_) => "pre_reasoning",
            Self::PostReasoning(_) => "post_reasoning",
            Self::ReasoningChunk(_) => "reasoning_chunk",
            Self::PreActing(_) => "pre_acting",
            Self::PostActing(_) => "post_acting",
            Self::ActingChunk(_) => "acting_chunk",
            Self::Error(_) => "error",
        }
    }

    pub fn phase(&self) -> HookPhase {
        match self {
            Self::PreCall(_) | Self::PostCall(_) => HookPhase::Call,
            Self::PreReasoning(_) | Self::PostReasoning(_) | Self::ReasoningChunk(_) => {
                HookPhase::Reasoning
            }
            Self::PreActing(_) | Self::PostActing(_) | Self::ActingChunk(_) => HookPhase::Acting,
            Self::Error(e) => e.phase,
        }
    }

    /// Name of the agent that fired the event.
    pub fn agent(&self) -> &str {
        match self {
            Self::PreCall(e) => &e.agent,
            Self::PostCall(e) => &e.agent,
            Self::PreReasoning(e) => &e.agent,
            Self::PostReasoning(e) => &e.agent,
            Self::ReasoningChunk(e) => &e.agent,
            Self::PreActing(e) => &e.agent,
            Self::PostActing(e) => &e.agent,
            Self::ActingChunk(e) => &e.agent,
            Self::Error(e) => &e.agent,
        }
    }

    /// Whether handlers can modify this event's payload.
    pub fn is_mutable(&self) -> bool {
        matches!(
            self,
            Self::PostCall(_)
                | Self::PreReasoning(_)
                | Self::PostReasoning(_)
                | Self::PreActing(_)
                | Self::PostActing(_)
        )
    }

    /// Re-borrow the event for the next handler in the chain.
    pub fn reborrow(&mut self) -> HookEvent<'_> {
        match self {
            Self::PreCall(e) => HookEvent::PreCall(e),
            Self::PostCall(e) => HookEvent::PostCall(e),
            Self::PreReasoning(e) => HookEvent::PreReasoning(e),
            Self::PostReasoning(e) => HookEvent::PostReasoning(e),
            Self::ReasoningChunk(e) => HookEvent::ReasoningChunk(e),
            Self::PreActing(e) => HookEvent::PreActing(e),
            Self::PostActing(e) => HookEvent::PostActing(e),
            Self::ActingChunk(e) => HookEvent::ActingChunk(e),
            Self::Error(e) => HookEvent::Error(e),
        }
    }
}

/// An interceptor attached to the loop.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        100
    }

    /// Observe or edit one event. Returning an error aborts the chain.
    async fn on_event(&self, event: HookEvent<'_>) -> Result<(), HookError>;
}

/// Priority-ordered list of hooks.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a hook after every hook whose priority is lower or equal.
    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        let priority = hook.priority();
        let pos = self
            .hooks
            .iter()
            .position(|h| h.priority() > priority)
            .unwrap_or(self.hooks.len());
        self.hooks.insert(pos, hook);
    }

    /// Remove every hook with the given name. Returns `true` if any was found.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|h| h.name() != name);
        self.hooks.len() < before
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hook names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.hooks.iter().map(|h| h.name().to_string()).collect()
    }

    /// Thread `event` through every hook in order.
    pub async fn fire(&self, mut event: HookEvent<'_>) -> Result<(), HookError> {
        for hook in &self.hooks {
            tracing::trace!(hook = hook.name(), event = event.kind(), "Dispatching hook");
            if let Err(e) = hook.on_event(event.reborrow()).await {
                tracing::warn!(
                    hook = hook.name(),
                    event = event.kind(),
                    error = %e,
                    "Hook aborted the chain"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookChain")
            .field("hooks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Hook for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        async fn on_event(&self, _event: HookEvent<'_>) -> Result<(), HookError> {
            self.log.lock().unwrap().push(self.name.clone());
            Ok(())
        }
    }

    fn recorder(name: &str, priority: i32, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Hook> {
        Arc::new(Recorder {
            name: name.into(),
            priority,
            log: log.clone(),
        })
    }

    fn pre_call() -> PreCall {
        PreCall {
            agent: "a".into(),
            input: vec![],
        }
    }

    #[tokio::test]
    async fn runs_in_priority_then_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::new();
        chain.register(recorder("late", 200, &log));
        chain.register(recorder("first-tie", 50, &log));
        chain.register(recorder("second-tie", 50, &log));
        chain.register(recorder("early", 10, &log));

        chain.fire(HookEvent::PreCall(&pre_call())).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["early", "first-tie", "second-tie", "late"]
        );
    }

    struct Rewriter;

    #[async_trait]
    impl Hook for Rewriter {
        fn name(&self) -> &str {
            "rewriter"
        }

        async fn on_event(&self, event: HookEvent<'_>) -> Result<(), HookError> {
            if let HookEvent::PostCall(e) = event {
                e.message = Message::assistant(&e.agent, format!("{}!", e.message.text()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn mutations_accumulate_across_handlers() {
        let mut chain = HookChain::new();
        chain.register(Arc::new(Rewriter));
        chain.register(Arc::new(Rewriter));

        let mut post = PostCall {
            agent: "bot".into(),
            message: Message::assistant("bot", "done"),
        };
        chain.fire(HookEvent::PostCall(&mut post)).await.unwrap();
        assert_eq!(post.message.text(), "done!!");
    }

    struct Failing;

    #[async_trait]
    impl Hook for Failing {
        fn name(&self) -> &str {
            "guard"
        }

        fn priority(&self) -> i32 {
            0
        }

        async fn on_event(&self, _event: HookEvent<'_>) -> Result<(), HookError> {
            Err(HookError::new("guard", "nope"))
        }
    }

    #[tokio::test]
    async fn error_aborts_remaining_handlers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::new();
        chain.register(recorder("after", 100, &log));
        chain.register(Arc::new(Failing));

        let err = chain.fire(HookEvent::PreCall(&pre_call())).await.unwrap_err();
        assert_eq!(err.hook, "guard");
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn event_metadata() {
        let pre = pre_call();
        let event = HookEvent::PreCall(&pre);
        assert_eq!(event.kind(), "pre_call");
        assert_eq!(event.phase(), HookPhase::Call);
        assert!(!event.is_mutable());

        let err = ErrorEvent {
            agent: "a".into(),
            phase: HookPhase::Reasoning,
            error: "boom".into(),
        };
        assert_eq!(HookEvent::Error(&err).phase(), HookPhase::Reasoning);
        assert_eq!(HookPhase::Acting.to_string(), "acting");
    }

    #[test]
    fn unregister_by_name() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::new();
        chain.register(recorder("x", 1, &log));
        chain.register(recorder("y", 2, &log));
        assert!(chain.unregister("x"));
        assert!(!chain.unregister("x"));
        assert_eq!(chain.names(), vec!["y"]);
    }
}
