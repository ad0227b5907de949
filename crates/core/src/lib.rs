//! # Reagent Core
//!
//! Domain types, traits, and error definitions for the Reagent ReAct agent framework.
//! Every other crate depends inward on this one: it owns the canonical message
//! model, the provider transport/format contracts, the memory traits and the
//! hook chain.

pub mod agent;
pub mod error;
pub mod hook;
pub mod memory;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::AgentRef;
pub use error::{Error, FormatError, HookError, MemoryError, ProviderError, Result, ToolError};
pub use hook::{Hook, HookChain, HookEvent, HookPhase};
pub use memory::{LongTermMemory, Memory};
pub use message::{
    ContentBlock, ControlType, Message, Role, Source, ToolResultBlock, ToolUseBlock,
};
pub use provider::{
    ChatResponse, ChunkReceiver, FinishReason, Formatter, GenerateOptions, ProviderRequest,
    StreamDelta, StreamParser, Transport, Usage,
};
pub use tool::{ToolChunk, ToolSchema};
