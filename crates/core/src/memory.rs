//! Memory traits: the conversation log and the long-term memory hint source.
//!
//! The loop controller only needs an append-ordered log: `append` and
//! `read_all`. Long-term memory is a narrow collaborator that may contribute a
//! hint before each reasoning step and record finished turns.

use async_trait::async_trait;

use crate::error::MemoryError;
use crate::message::Message;

/// Append-ordered short-term message log owned by one agent.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Backend name (e.g. "in_memory", "jsonl").
    fn name(&self) -> &str;

    /// Append a message to the end of the log.
    async fn append(&self, message: Message) -> Result<(), MemoryError>;

    /// All messages in insertion order.
    async fn read_all(&self) -> Result<Vec<Message>, MemoryError>;

    /// Number of stored messages.
    async fn size(&self) -> Result<usize, MemoryError> {
        Ok(self.read_all().await?.len())
    }
}

/// Source of retrieved background knowledge.
#[async_trait]
pub trait LongTermMemory: Send + Sync {
    fn name(&self) -> &str;

    /// Produce a hint for the upcoming reasoning step, if any.
    async fn retrieve(&self, context: &[Message]) -> Result<Option<String>, MemoryError>;

    /// Record a finished turn. Backends that learn nothing may ignore it.
    async fn record(&self, _messages: &[Message]) -> Result<(), MemoryError> {
        Ok(())
    }
}
