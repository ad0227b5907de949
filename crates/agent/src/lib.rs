//! The ReAct loop controller for Reagent.
//!
//! An agent follows a **Reason → Act → Observe** cycle:
//!
//! 1. **Receive** input messages and append them to memory
//! 2. **Build context** (system prompt + long-term memory hint + memory log)
//! 3. **Send to the model** through the configured formatter and transport
//! 4. **If tool calls**: execute tools, store results, loop back to step 2
//! 5. **If text response**: store it and return it to the caller
//!
//! The loop continues until the model responds without tool calls, the
//! iteration limit is reached, or the agent is interrupted.

pub mod agent;
pub mod config;
pub mod interrupt;
pub mod stream_event;
pub mod structured;

/// Scripted transport for driving an agent in tests.
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use agent::{AgentParts, LONG_TERM_MEMORY_NAME, ReActAgent};
pub use config::{AgentConfig, DEFAULT_INTERRUPT_MESSAGE};
pub use interrupt::InterruptHandle;
pub use stream_event::{AgentStreamEvent, StreamEventHook};
pub use structured::{GENERATE_RESPONSE, STRUCTURED_OUTPUT_KEY};
