//! In-memory conversation log: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use reagent_core::error::MemoryError;
use reagent_core::memory::Memory;
use reagent_core::message::Message;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A conversation log kept in a Vec.
pub struct InMemoryMemory {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start from an existing history.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::new(RwLock::new(messages)),
        }
    }
}

impl Default for InMemoryMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Memory for InMemoryMemory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, message: Message) -> Result<(), MemoryError> {
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Message>, MemoryError> {
        Ok(self.messages.read().await.clone())
    }

    async fn size(&self) -> Result<usize, MemoryError> {
        Ok(self.messages.read().await.len())
    }
}
