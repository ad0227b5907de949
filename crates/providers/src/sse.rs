//! Server-sent events decoding.
//!
//! Bytes are buffered until a full line is available so multi-byte UTF-8
//! sequences split across network chunks decode correctly. An event is
//! dispatched on a blank line; multiple `data:` lines are joined with `\n`.

use tracing::trace;

/// Incremental SSE decoder yielding the `data` payload of each event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the payloads of every completed event.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            self.handle_line(line, &mut events);
        }

        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end().to_string();
            let mut events = Vec::new();
            self.handle_line(&line, &mut events);
            if let Some(event) = events.pop() {
                return Some(event);
            }
        }
        self.take_event()
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if let Some(event) = self.take_event() {
                events.push(event);
            }
            return;
        }

        // Comments (e.g. DashScope's ":HTTP_STATUS/200")
        if line.starts_with(':') {
            trace!(line, "Skipping SSE comment");
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            // event/id/retry carry nothing the parsers need: every payload
            // is self-describing JSON.
            _ => trace!(field, "Ignoring SSE field"),
        }
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data).join("\n"))
    }
}
