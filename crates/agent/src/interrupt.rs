//! Cooperative interruption.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reagent_core::AgentRef;

/// Shared interrupt flag of one agent.
///
/// Setting it takes effect at the agent's next reasoning step; in-flight tool
/// calls finish and are recorded first. The flag stays set until [`reset`].
///
/// [`reset`]: InterruptHandle::reset
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The agent back-reference handed to tools.
#[derive(Debug, Clone)]
pub(crate) struct AgentHandle {
    pub name: String,
    pub interrupt: InterruptHandle,
}

impl AgentRef for AgentHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }
}
