//! File-based conversation log: persistent JSON-lines storage.
//!
//! Each line is one JSON-encoded `Message`. Messages are loaded on creation
//! and every append writes one line, so the file is always a prefix-complete
//! record of the conversation.

use async_trait::async_trait;
use reagent_core::error::MemoryError;
use reagent_core::memory::Memory;
use reagent_core::message::Message;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A conversation log backed by a JSONL file.
pub struct JsonlFileMemory {
    path: PathBuf,
    messages: Arc<RwLock<Vec<Message>>>,
}

impl JsonlFileMemory {
    /// Open the log at `path`.
    ///
    /// If the file exists, messages are loaded from it.
    /// If the file does not exist, starts empty (file created on first append).
    pub fn new(path: PathBuf) -> Self {
        let messages = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = messages.len(), "File memory loaded");
        Self {
            path,
            messages: Arc::new(RwLock::new(messages)),
        }
    }

    /// Default path for a named session: `~/.reagent/sessions/<session>.jsonl`
    pub fn default_path(session: &str) -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".reagent")
            .join("sessions")
            .join(format!("{session}.jsonl"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<Message> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(), // File doesn't exist yet, start empty
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Message>(line) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted message line");
                    None
                }
            })
            .collect()
    }

    fn write_line(&self, message: &Message) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Failed to create memory directory: {e}"))
            })?;
        }

        let line = serde_json::to_string(message)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize message: {e}")))?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MemoryError::Storage(format!("Failed to open memory file: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))
    }
}

#[async_trait]
impl Memory for JsonlFileMemory {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn append(&self, message: Message) -> Result<(), MemoryError> {
        // Hold the write lock across the file write so lines keep log order.
        let mut messages = self.messages.write().await;
        self.write_line(&message)?;
        messages.push(message);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Message>, MemoryError> {
        Ok(self.messages.read().await.clone())
    }

    async fn size(&self) -> Result<usize, MemoryError> {
        Ok(self.messages.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagent_core::{ContentBlock, Role, ToolUseBlock};
    use tempfile::TempDir;

    #[tokio::test]
    async fn append_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("log.jsonl");

        let mem = JsonlFileMemory::new(path.clone());
        mem.append(Message::user("What's the weather?")).await.unwrap();
        let call = Message::new(
            "bot",
            Role::Assistant,
            vec![ContentBlock::ToolUse(ToolUseBlock::new("c1", "get_weather", Default::default()))],
        );
        mem.append(call.clone()).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);

        let reopened = JsonlFileMemory::new(path);
        let all = reopened.read_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].text(), "What's the weather?");
        assert_eq!(all[1], call);
    }

    #[tokio::test]
    async fn handles_missing_file_gracefully() {
        let dir = TempDir::new().unwrap();
        let mem = JsonlFileMemory::new(dir.path().join("absent.jsonl"));
        assert_eq!(mem.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handles_corrupted_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");
        let good = serde_json::to_string(&Message::user("valid")).unwrap();
        std::fs::write(&path, format!("{good}\nthis is not json\n{good}\n")).unwrap();

        let mem = JsonlFileMemory::new(path);
        // Should load 2 valid messages, skip the corrupted one
        assert_eq!(mem.size().await.unwrap(), 2);
    }
}
