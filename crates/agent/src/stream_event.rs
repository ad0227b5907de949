//! Agent-level streaming events.
//!
//! `StreamEventHook` turns hook notifications into `AgentStreamEvent`s on a
//! channel, so a caller can follow a `call` while it runs.

use async_trait::async_trait;
use reagent_core::error::HookError;
use reagent_core::hook::{Hook, HookEvent};
use reagent_core::message::join_text;
use reagent_core::provider::{StreamDelta, Usage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Events emitted by the agent during execution.
///
/// - `chunk`         partial answer text from the model
/// - `thought`       partial reasoning text
/// - `tool_call`     the agent is invoking a tool
/// - `tool_progress` intermediate tool output
/// - `tool_result`   tool execution completed
/// - `done`          the call finished
/// - `error`         the call failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Partial text token from the LLM.
    Chunk { content: String },

    /// A reasoning delta.
    Thought { content: String },

    /// The agent is calling a tool.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// Progress reported by a running tool.
    ToolProgress {
        id: String,
        name: String,
        content: String,
    },

    /// Tool execution completed.
    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    /// The call is complete.
    Done {
        agent: String,
        message_id: String,
        content: String,
        usage: Option<Usage>,
    },

    /// An error occurred mid-call.
    Error { phase: String, message: String },
}

impl AgentStreamEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolProgress { .. } => "tool_progress",
            Self::ToolResult { .. } => "tool_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    fn from_hook(event: &HookEvent<'_>) -> Option<Self> {
        let converted = match event {
            HookEvent::ReasoningChunk(e) => match &e.delta {
                StreamDelta::Text { text } => Self::Chunk {
                    content: text.clone(),
                },
                StreamDelta::Thinking { text } => Self::Thought {
                    content: text.clone(),
                },
                StreamDelta::ToolCallStarted { .. } => return None,
            },
            HookEvent::PreActing(e) => Self::ToolCall {
                id: e.tool_use.id.clone(),
                name: e.tool_use.name.clone(),
                input: serde_json::Value::Object(e.tool_use.input.clone()),
            },
            HookEvent::ActingChunk(e) => Self::ToolProgress {
                id: e.chunk.tool_use_id.clone(),
                name: e.tool_name.clone(),
                content: join_text(&e.chunk.content),
            },
            HookEvent::PostActing(e) => Self::ToolResult {
                id: e.result.id.clone(),
                name: e.result.name.clone(),
                output: e.result.output_text(),
                success: !e.result.is_error,
            },
            HookEvent::PostCall(e) => Self::Done {
                agent: e.agent.clone(),
                message_id: e.message.id.clone(),
                content: e.message.joined_text(),
                usage: e
                    .message
                    .metadata
                    .get("usage")
                    .and_then(|u| serde_json::from_value(u.clone()).ok()),
            },
            HookEvent::Error(e) => Self::Error {
                phase: e.phase.to_string(),
                message: e.error.clone(),
            },
            HookEvent::PreCall(_) | HookEvent::PreReasoning(_) | HookEvent::PostReasoning(_) => {
                return None;
            }
        };
        Some(converted)
    }
}

/// Forwards loop events to a channel. Runs after every other hook so it sees
/// the final state of mutable events.
pub struct StreamEventHook {
    tx: mpsc::Sender<AgentStreamEvent>,
}

impl StreamEventHook {
    pub fn new(tx: mpsc::Sender<AgentStreamEvent>) -> Self {
        Self { tx }
    }

    /// A hook plus the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AgentStreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Hook for StreamEventHook {
    fn name(&self) -> &str {
        "stream_events"
    }

    fn priority(&self) -> i32 {
        i32::MAX
    }

    async fn on_event(&self, event: HookEvent<'_>) -> Result<(), HookError> {
        let Some(converted) = AgentStreamEvent::from_hook(&event) else {
            return Ok(());
        };
        if self.tx.send(converted).await.is_err() {
            trace!(event = event.kind(), "Stream event receiver dropped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagent_core::hook::{ErrorEvent, HookPhase, PostActing, ReasoningChunk};
    use reagent_core::{ToolResultBlock, ToolUseBlock};

    #[test]
    fn event_serialization_chunk() {
        let event = AgentStreamEvent::Chunk {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"chunk""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn event_serialization_tool_progress() {
        let event = AgentStreamEvent::ToolProgress {
            id: "call_1".into(),
            name: "download".into(),
            content: "50%".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"tool_progress""#));
        assert_eq!(event.event_type(), "tool_progress");
    }

    #[tokio::test]
    async fn hook_forwards_converted_events() {
        let (hook, mut rx) = StreamEventHook::channel(8);

        let chunk = ReasoningChunk {
            agent: "bot".into(),
            delta: StreamDelta::Thinking { text: "hmm".into() },
        };
        hook.on_event(HookEvent::ReasoningChunk(&chunk)).await.unwrap();

        let mut post = PostActing {
            agent: "bot".into(),
            iteration: 0,
            tool_use: ToolUseBlock::new("c1", "lookup", Default::default()),
            result: ToolResultBlock::error("c1", "lookup", "boom"),
        };
        hook.on_event(HookEvent::PostActing(&mut post)).await.unwrap();

        let err = ErrorEvent {
            agent: "bot".into(),
            phase: HookPhase::Reasoning,
            error: "offline".into(),
        };
        hook.on_event(HookEvent::Error(&err)).await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            AgentStreamEvent::Thought {
                content: "hmm".into()
            }
        );
        match rx.recv().await.unwrap() {
            AgentStreamEvent::ToolResult { success, output, .. } => {
                assert!(!success);
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap().event_type(), "error");
    }

    #[tokio::test]
    async fn closed_receiver_is_not_an_error() {
        let (hook, rx) = StreamEventHook::channel(1);
        drop(rx);
        let chunk = ReasoningChunk {
            agent: "bot".into(),
            delta: StreamDelta::Text { text: "hi".into() },
        };
        assert!(hook.on_event(HookEvent::ReasoningChunk(&chunk)).await.is_ok());
    }
}
