//! Long-term memory collaborators.
//!
//! The agent asks its long-term memory for a hint before each reasoning step.
//! Retrieval algorithms are pluggable; these backends cover the disabled case,
//! a fixed hint, and a small keyword store of recorded turns.

use async_trait::async_trait;
use reagent_core::error::MemoryError;
use reagent_core::memory::LongTermMemory;
use reagent_core::message::{Message, Role};
use tokio::sync::RwLock;

/// A long-term memory that never contributes anything.
pub struct NoopLongTermMemory;

#[async_trait]
impl LongTermMemory for NoopLongTermMemory {
    fn name(&self) -> &str {
        "none"
    }

    async fn retrieve(&self, _context: &[Message]) -> Result<Option<String>, MemoryError> {
        Ok(None)
    }
}

/// Always returns the same hint.
pub struct StaticLongTermMemory {
    hint: String,
}

impl StaticLongTermMemory {
    pub fn new(hint: impl Into<String>) -> Self {
        Self { hint: hint.into() }
    }
}

#[async_trait]
impl LongTermMemory for StaticLongTermMemory {
    fn name(&self) -> &str {
        "static"
    }

    async fn retrieve(&self, _context: &[Message]) -> Result<Option<String>, MemoryError> {
        if self.hint.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(self.hint.clone()))
    }
}

/// Remembers the text of recorded turns and recalls the ones that share
/// words with the latest user message.
pub struct KeywordLongTermMemory {
    entries: RwLock<Vec<String>>,
    limit: usize,
}

impl KeywordLongTermMemory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            limit: limit.max(1),
        }
    }

    pub async fn remember(&self, text: impl Into<String>) {
        self.entries.write().await.push(text.into());
    }

    /// Occurrences of the query words, normalized by entry length.
    fn score(entry: &str, words: &[String]) -> f32 {
        let lower = entry.to_lowercase();
        let occurrences: usize = words.iter().map(|w| lower.matches(w.as_str()).count()).sum();
        occurrences as f32 / (entry.len() as f32 / 100.0).max(1.0)
    }
}

fn query_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl LongTermMemory for KeywordLongTermMemory {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn retrieve(&self, context: &[Message]) -> Result<Option<String>, MemoryError> {
        let Some(query) = context.iter().rev().find(|m| m.role == Role::User) else {
            return Ok(None);
        };
        let words = query_words(&query.joined_text());
        if words.is_empty() {
            return Ok(None);
        }

        let entries = self.entries.read().await;
        let mut scored: Vec<(f32, &String)> = entries
            .iter()
            .map(|e| (Self::score(e, &words), e))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        if scored.is_empty() {
            return Ok(None);
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.limit);

        let hint = scored
            .into_iter()
            .map(|(_, e)| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(hint))
    }

    async fn record(&self, messages: &[Message]) -> Result<(), MemoryError> {
        let mut entries = self.entries.write().await;
        for message in messages {
            if !matches!(message.role, Role::User | Role::Assistant) {
                continue;
            }
            let text = message.joined_text();
            if !text.trim().is_empty() {
                entries.push(format!("{}: {text}", message.name));
            }
        }
        Ok(())
    }
}
