//! Memory implementations for Reagent.
//!
//! Short-term memory is the agent's append-ordered conversation log; long-term
//! memory contributes optional hints before each reasoning step.

pub mod file_backend;
pub mod in_memory;
pub mod long_term;

pub use file_backend::JsonlFileMemory;
pub use in_memory::InMemoryMemory;
pub use long_term::{KeywordLongTermMemory, NoopLongTermMemory, StaticLongTermMemory};
