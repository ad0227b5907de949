//! Agent back-reference handed to tools.

/// A handle on the agent that invoked a tool.
///
/// Tools may read the agent's name or request a cooperative interrupt; they
/// never get access to its memory or toolkit.
pub trait AgentRef: Send + Sync {
    fn name(&self) -> &str;

    /// Request that the agent stop at its next reasoning step.
    fn interrupt(&self);

    fn is_interrupted(&self) -> bool;
}
