//! Multi-agent history flattening.
//!
//! Most chat APIs only know one assistant. When several agents share a
//! conversation, turns from users and from other speakers are folded into a
//! single synthetic user message listing `name: text` lines, while system
//! prompts, tool traffic and the current speaker's own tool-calling turns are
//! left to the wrapped formatter.

use reagent_core::message::{ContentBlock, Message, Role};
use reagent_core::provider::{ChatResponse, Formatter, GenerateOptions, StreamParser};
use reagent_core::{FormatError, ToolSchema};
use serde_json::Value;

const HISTORY_HEADER: &str = "# Conversation History\n\
The content between <history></history> tags contains your conversation history";

/// Wraps a provider formatter with history flattening.
pub struct MultiAgentFormatter<F: Formatter> {
    inner: F,
    /// Name of the agent the request is sent on behalf of
    speaker: Option<String>,
    name: String,
}

impl<F: Formatter> MultiAgentFormatter<F> {
    pub fn new(inner: F) -> Self {
        let name = format!("{}-multiagent", inner.name());
        Self {
            inner,
            speaker: None,
            name,
        }
    }

    /// Keep assistant turns produced by `speaker` native.
    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    fn stays_native(&self, message: &Message) -> bool {
        match message.role {
            Role::System | Role::Tool | Role::Control => true,
            Role::Assistant => {
                message.has_tool_use() || self.speaker.as_deref() == Some(message.name.as_str())
            }
            Role::User => false,
        }
    }

    /// Fold conversation turns into synthetic history messages.
    pub fn flatten(&self, messages: &[Message]) -> Vec<Message> {
        let mut out = Vec::with_capacity(messages.len());
        let mut pending: Vec<&Message> = Vec::new();

        for message in messages {
            if self.stays_native(message) {
                if !pending.is_empty() {
                    out.push(history_message(&pending));
                    pending.clear();
                }
                out.push(message.clone());
            } else {
                pending.push(message);
            }
        }
        if !pending.is_empty() {
            out.push(history_message(&pending));
        }
        out
    }
}

fn history_message(turns: &[&Message]) -> Message {
    let mut text = format!("{HISTORY_HEADER}\n<history>\n");
    let mut media = Vec::new();

    for turn in turns {
        let line = turn.joined_text();
        if !line.is_empty() {
            text.push_str(&turn.name);
            text.push_str(": ");
            text.push_str(&line);
            text.push('\n');
        }
        media.extend(turn.content.iter().filter(|b| {
            matches!(
                b,
                ContentBlock::Image { .. } | ContentBlock::Audio { .. } | ContentBlock::Video { .. }
            )
        }).cloned());
    }
    text.push_str("</history>");

    let mut content = vec![ContentBlock::text(text)];
    content.extend(media);
    Message::new("user", Role::User, content)
}

impl<F: Formatter> Formatter for MultiAgentFormatter<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self, messages: &[Message], options: &GenerateOptions) -> Result<Value, FormatError> {
        self.inner.format(&self.flatten(messages), options)
    }

    fn apply_tools(&self, body: &mut Value, tools: &[ToolSchema]) {
        self.inner.apply_tools(body, tools);
    }

    fn enable_streaming(&self, body: &mut Value) {
        self.inner.enable_streaming(body);
    }

    fn parse_response(&self, response: &Value) -> ChatResponse {
        self.inner.parse_response(response)
    }

    fn stream_parser(&self) -> Box<dyn StreamParser> {
        self.inner.stream_parser()
    }

    fn unwraps_wrapper(&self) -> bool {
        self.inner.unwraps_wrapper()
    }
}
