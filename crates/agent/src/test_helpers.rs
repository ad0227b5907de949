//! Shared test helpers: a transport that replays scripted provider payloads.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reagent_core::error::ProviderError;
use reagent_core::provider::{ChunkReceiver, ProviderRequest, Transport};
use reagent_providers::{ChatModel, OpenAiFormatter};
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// A complete response body
    Reply(Value),
    /// Stream chunks, delivered in order
    Chunks(Vec<Value>),
    /// A transport failure
    Fail(ProviderError),
}

/// A mock transport that returns a sequence of scripted responses.
///
/// Each request consumes the next entry. Requests past the end of the script
/// fail with [`ProviderError::InvalidResponse`].
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<Value>>,
    repeat: Option<Value>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Replies with `bodies`, one per call.
    pub fn replies(bodies: Vec<Value>) -> Self {
        Self::new(bodies.into_iter().map(Scripted::Reply).collect())
    }

    /// Returns `body` for every request, forever.
    pub fn repeating(body: Value) -> Self {
        Self {
            repeat: Some(body),
            ..Self::default()
        }
    }

    /// Request bodies received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn next(&self, request: ProviderRequest) -> Scripted {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.body);
        }
        if let Some(body) = &self.repeat {
            return Scripted::Reply(body.clone());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| {
                Scripted::Fail(ProviderError::InvalidResponse("script exhausted".into()))
            })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: ProviderRequest) -> Result<Value, ProviderError> {
        match self.next(request) {
            Scripted::Reply(body) => Ok(body),
            Scripted::Chunks(_) => Err(ProviderError::InvalidResponse(
                "scripted a stream for a non-streaming request".into(),
            )),
            Scripted::Fail(e) => Err(e),
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let chunks = match self.next(request) {
            Scripted::Chunks(chunks) => chunks,
            Scripted::Reply(body) => vec![body],
            Scripted::Fail(e) => return Err(e),
        };
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// An OpenAI-format model over `transport`.
pub fn scripted_model(transport: Arc<ScriptedTransport>) -> Arc<ChatModel> {
    Arc::new(ChatModel::new(
        "scripted",
        "mock-model",
        Arc::new(OpenAiFormatter::new()),
        transport,
    ))
}

/// A plain text completion.
pub fn text_response(text: &str) -> Value {
    json!({
        "id": "resp_text",
        "choices": [{"message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5}
    })
}

/// A completion requesting the given `(id, name, arguments)` tool calls.
pub fn tool_call_response(calls: &[(&str, &str, Value)]) -> Value {
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(id, name, args)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": args.to_string()},
            })
        })
        .collect();
    json!({
        "id": "resp_tools",
        "choices": [{
            "message": {"role": "assistant", "content": null, "tool_calls": tool_calls},
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5}
    })
}

/// Streamed chunks spelling out `parts` as text deltas.
pub fn text_stream(parts: &[&str]) -> Vec<Value> {
    let mut chunks: Vec<Value> = parts
        .iter()
        .map(|p| json!({"id": "resp_stream", "choices": [{"delta": {"content": p}}]}))
        .collect();
    chunks.push(json!({
        "id": "resp_stream",
        "choices": [{"delta": {}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 3, "completion_tokens": parts.len()}
    }));
    chunks
}
