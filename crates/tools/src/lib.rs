//! Tool execution engine for Reagent.
//!
//! Tools give the agent the ability to act: a [`Toolkit`] holds registered
//! [`ToolFunction`]s in switchable groups, resolves their parameters and turns
//! every outcome, failures included, into a `ToolResultBlock`.

pub mod function;
pub mod input;
pub mod mcp;
pub mod toolkit;

pub use function::{FnTool, ToolFunction, ToolReturn, TypedTool};
pub use input::{ToolContext, ToolEmitter, ToolInput};
pub use mcp::{McpCallResult, McpClient, McpTool};
pub use toolkit::{BASIC_GROUP, ExecutionContext, ToolRegistration, Toolkit};
