//! Tool functions and their return values.
//!
//! Tools are registered explicitly: either as a closure with a hand-written
//! parameter schema ([`FnTool`]) or as a typed handler whose schema is derived
//! from its argument struct ([`TypedTool`]).

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use reagent_core::{ContentBlock, ToolError, ToolResultBlock, ToolSchema};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::input::ToolInput;

/// A callable tool.
#[async_trait]
pub trait ToolFunction: Send + Sync {
    /// The declaration sent to the model.
    fn schema(&self) -> ToolSchema;

    /// Run the tool.
    async fn call(&self, input: ToolInput) -> Result<ToolReturn, ToolError>;
}

/// What a tool hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolReturn {
    Text(String),
    /// A complete result block; its output and error flag are kept
    Block(ToolResultBlock),
    /// Any other value, serialized to text
    Value(Value),
}

impl ToolReturn {
    /// Wrap into the result block for call `id` of tool `name`.
    pub fn into_result(self, id: &str, name: &str) -> ToolResultBlock {
        match self {
            Self::Text(text) => ToolResultBlock::text(id, name, text),
            Self::Block(block) => ToolResultBlock {
                id: id.to_string(),
                name: name.to_string(),
                output: block.output,
                is_error: block.is_error,
            },
            Self::Value(Value::String(text)) => ToolResultBlock::text(id, name, text),
            Self::Value(value) => ToolResultBlock::text(id, name, value.to_string()),
        }
    }
}

impl From<String> for ToolReturn {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ToolReturn {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Value> for ToolReturn {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<ToolResultBlock> for ToolReturn {
    fn from(b: ToolResultBlock) -> Self {
        Self::Block(b)
    }
}

impl From<Vec<ContentBlock>> for ToolReturn {
    fn from(output: Vec<ContentBlock>) -> Self {
        Self::Block(ToolResultBlock {
            id: String::new(),
            name: String::new(),
            output,
            is_error: false,
        })
    }
}

type Handler = Arc<dyn Fn(ToolInput) -> BoxFuture<'static, Result<ToolReturn, ToolError>> + Send + Sync>;

/// A tool backed by a closure and an explicit schema.
pub struct FnTool {
    schema: ToolSchema,
    handler: Handler,
}

impl FnTool {
    pub fn new<H, Fut, R>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: H,
    ) -> Self
    where
        H: Fn(ToolInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ToolError>> + Send + 'static,
        R: Into<ToolReturn>,
    {
        let handler: Handler = Arc::new(move |input| {
            let fut = handler(input);
            Box::pin(async move { fut.await.map(Into::into) })
        });
        Self {
            schema: ToolSchema::new(name, description, parameters),
            handler,
        }
    }
}

#[async_trait]
impl ToolFunction for FnTool {
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn call(&self, input: ToolInput) -> Result<ToolReturn, ToolError> {
        (self.handler)(input).await
    }
}

type TypedHandler<A> =
    Arc<dyn Fn(A, ToolInput) -> BoxFuture<'static, Result<ToolReturn, ToolError>> + Send + Sync>;

/// A tool whose parameter schema is derived from `A`.
///
/// Arguments (with presets merged in) are deserialized into `A`; the handler
/// also receives the [`ToolInput`] for context, emitter and agent access.
pub struct TypedTool<A> {
    schema: ToolSchema,
    handler: TypedHandler<A>,
    _args: PhantomData<fn() -> A>,
}

impl<A> TypedTool<A>
where
    A: JsonSchema + DeserializeOwned + Send + 'static,
{
    pub fn new<H, Fut, R>(name: impl Into<String>, description: impl Into<String>, handler: H) -> Self
    where
        H: Fn(A, ToolInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, ToolError>> + Send + 'static,
        R: Into<ToolReturn>,
    {
        let parameters = serde_json::to_value(schemars::schema_for!(A)).unwrap_or(Value::Null);
        let handler: TypedHandler<A> = Arc::new(move |args, input| {
            let fut = handler(args, input);
            Box::pin(async move { fut.await.map(Into::into) })
        });
        Self {
            schema: ToolSchema::new(name, description, parameters),
            handler,
            _args: PhantomData,
        }
    }
}

#[async_trait]
impl<A> ToolFunction for TypedTool<A>
where
    A: JsonSchema + DeserializeOwned + Send + 'static,
{
    fn schema(&self) -> ToolSchema {
        self.schema.clone()
    }

    async fn call(&self, input: ToolInput) -> Result<ToolReturn, ToolError> {
        let args: A = serde_json::from_value(Value::Object(input.merged_args()))
            .map_err(|e| ToolError::InvalidArguments(format!("{}: {e}", self.schema.name)))?;
        (self.handler)(args, input).await
    }
}
