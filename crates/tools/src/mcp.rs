//! Bridge remote MCP tools into a [`Toolkit`].
//!
//! A remote tool is registered like any local one; the executor does not
//! distinguish between them. The wire client (stdio, HTTP) is supplied by the
//! caller through the [`McpClient`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use reagent_core::{ContentBlock, ToolError, ToolResultBlock, ToolSchema};
use serde_json::{Map, Value};
use tracing::info;

use crate::function::{ToolFunction, ToolReturn};
use crate::input::ToolInput;
use crate::toolkit::{Toolkit, ToolRegistration};

/// Result of one remote tool call.
#[derive(Debug, Clone, Default)]
pub struct McpCallResult {
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
}

/// A connected MCP server.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Server name, used in logs.
    fn name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolSchema>, ToolError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<McpCallResult, ToolError>;
}

/// One remote tool exposed as a [`ToolFunction`].
pub struct McpTool {
    client: Arc<dyn McpClient>,
    schema: ToolSchema,
}

impl McpTool {
    pub fn new(client: Arc<dyn McpClient>, schema: ToolSchema) -> Self {
        Self { client, schema }
    }

    /// Get the tool name.
    pub fn tool_name(&self) -> &str {
        &self.schema.name
    }
}

#[async_trait]
impl ToolFunction for McpTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn call(&self, input: ToolInput) -> Result<ToolReturn, ToolError> {
        let result = self
            .client
            .call_tool(&self.schema.name, input.merged_args())
            .await?;
        Ok(ToolReturn::Block(ToolResultBlock {
            id: input.call_id.clone(),
            name: self.schema.name.clone(),
            output: result.content,
            is_error: result.is_error,
        }))
    }
}

impl Toolkit {
    /// Register the tools of an MCP server.
    ///
    /// `enable`, when given, keeps only the named tools; `disable` then drops
    /// names from what remains. Returns the number of tools registered.
    pub async fn register_mcp_client(
        &mut self,
        client: Arc<dyn McpClient>,
        group: Option<&str>,
        enable: Option<&[&str]>,
        disable: Option<&[&str]>,
    ) -> Result<usize, ToolError> {
        let schemas = client
            .list_tools()
            .await
            .map_err(|e| ToolError::Remote(format!("{}: {e}", client.name())))?;

        let mut registered = 0;
        for schema in schemas {
            let name = schema.name.as_str();
            if enable.is_some_and(|keep| !keep.contains(&name)) {
                continue;
            }
            if disable.is_some_and(|drop| drop.contains(&name)) {
                continue;
            }
            let registration = ToolRegistration {
                group: group.map(str::to_string),
                ..ToolRegistration::default()
            };
            self.register_with(Arc::new(McpTool::new(client.clone(), schema)), registration)?;
            registered += 1;
        }

        info!(server = client.name(), tools = registered, "Registered MCP tools");
        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::ExecutionContext;
    use reagent_core::ToolUseBlock;
    use serde_json::json;

    struct FakeServer;

    #[async_trait]
    impl McpClient for FakeServer {
        fn name(&self) -> &str {
            "fake"
        }

        async fn list_tools(&self) -> Result<Vec<ToolSchema>, ToolError> {
            Ok(["search", "fetch", "delete"]
                .into_iter()
                .map(|n| ToolSchema::new(n, "remote", json!({"type": "object", "properties": {"q": {"type": "string"}}})))
                .collect())
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: Map<String, Value>,
        ) -> Result<McpCallResult, ToolError> {
            Ok(McpCallResult {
                content: vec![ContentBlock::text(format!("{name}:{}", arguments["q"]))],
                is_error: name == "fetch",
            })
        }
    }

    #[tokio::test]
    async fn remote_tools_register_and_execute_like_local_ones() {
        let mut kit = Toolkit::new();
        kit.create_group("remote", "MCP tools", true).unwrap();
        let count = kit
            .register_mcp_client(Arc::new(FakeServer), Some("remote"), None, Some(&["delete"]))
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert!(kit.resolve("delete").is_none());

        let mut args = Map::new();
        args.insert("q".into(), json!("rust"));
        let ctx = ExecutionContext::default();
        let result = kit.execute(&ToolUseBlock::new("r1", "search", args.clone()), &ctx).await;
        assert_eq!(result.output_text(), "search:\"rust\"");
        assert!(!result.is_error);

        let failed = kit.execute(&ToolUseBlock::new("r2", "fetch", args), &ctx).await;
        assert!(failed.is_error);
        assert_eq!(failed.id, "r2");
    }

    #[tokio::test]
    async fn enable_list_filters() {
        let mut kit = Toolkit::new();
        let count = kit
            .register_mcp_client(Arc::new(FakeServer), None, Some(&["fetch"]), None)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert!(kit.resolve("fetch").is_some());
    }
}
