//! Agent construction settings.

use std::time::Duration;

use reagent_config::AgentSection;
use reagent_core::Error;

/// Reply used when an interrupted agent has no configured message.
pub const DEFAULT_INTERRUPT_MESSAGE: &str =
    "I noticed you have interrupted me. What can I do for you?";

/// Settings for one [`ReActAgent`](crate::ReActAgent).
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub name: String,
    /// Leading system message; empty sends none
    pub system_prompt: String,
    /// Maximum acting rounds per `call`
    pub max_iters: u32,
    pub parallel_tool_calls: bool,
    pub stream: bool,
    pub interrupt_message: String,
    pub tool_timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::from(&AgentSection::default())
    }
}

impl From<&AgentSection> for AgentConfig {
    fn from(section: &AgentSection) -> Self {
        Self {
            name: section.name.clone(),
            system_prompt: section.system_prompt.clone(),
            max_iters: section.max_iters,
            parallel_tool_calls: section.parallel_tool_calls,
            stream: section.stream,
            interrupt_message: section
                .interrupt_message
                .clone()
                .unwrap_or_else(|| DEFAULT_INTERRUPT_MESSAGE.to_string()),
            tool_timeout: section.tool_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::Config {
                message: "agent name must not be empty".into(),
            });
        }
        if self.max_iters == 0 {
            return Err(Error::Config {
                message: "max_iters must be at least 1".into(),
            });
        }
        if self.tool_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config {
                message: "tool timeout must be positive".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_conversion() {
        let section = AgentSection {
            name: "planner".into(),
            interrupt_message: None,
            tool_timeout_secs: Some(30),
            ..AgentSection::default()
        };
        let config = AgentConfig::from(&section);
        assert_eq!(config.name, "planner");
        assert_eq!(config.interrupt_message, DEFAULT_INTERRUPT_MESSAGE);
        assert_eq!(config.tool_timeout, Some(Duration::from_secs(30)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_settings() {
        let mut config = AgentConfig::new(" ");
        assert!(config.validate().is_err());

        config.name = "bot".into();
        config.max_iters = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_iters"));
    }
}
