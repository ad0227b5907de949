//! A chat model: one formatter paired with one transport.

use std::sync::Arc;

use reagent_core::provider::{
    ChatResponse, ChunkReceiver, Formatter, GenerateOptions, ProviderRequest, StreamDelta,
    StreamParser, Transport,
};
use reagent_core::{Message, ProviderError, ToolSchema};
use tracing::debug;

/// Formats canonical messages, sends them and parses the reply.
pub struct ChatModel {
    name: String,
    model: String,
    formatter: Arc<dyn Formatter>,
    transport: Arc<dyn Transport>,
    options: GenerateOptions,
}

impl ChatModel {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        formatter: Arc<dyn Formatter>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            formatter,
            transport,
            options: GenerateOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    /// Registry name of this model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provider model id.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn formatter(&self) -> &dyn Formatter {
        self.formatter.as_ref()
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    /// Build the provider request for `messages` and `tools`.
    pub fn build_request(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        stream: bool,
    ) -> reagent_core::Result<ProviderRequest> {
        let mut body = self.formatter.format(messages, &self.options)?;
        self.formatter.apply_tools(&mut body, tools);
        if stream {
            self.formatter.enable_streaming(&mut body);
        }
        Ok(ProviderRequest {
            model: self.model.clone(),
            body,
            stream,
        })
    }

    /// One complete (non-streamed) model call.
    pub async fn call(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> reagent_core::Result<ChatResponse> {
        let request = self.build_request(messages, tools, false)?;
        debug!(
            model = %self.model,
            formatter = self.formatter.name(),
            messages = messages.len(),
            tools = tools.len(),
            "Calling model"
        );
        let raw = self.transport.send(request).await?;
        Ok(self.formatter.parse_response(&raw))
    }

    /// Start a streamed model call.
    pub async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> reagent_core::Result<ResponseStream> {
        let request = self.build_request(messages, tools, true)?;
        debug!(model = %self.model, formatter = self.formatter.name(), "Streaming model call");
        let rx = self.transport.stream(request).await?;
        Ok(ResponseStream {
            rx,
            parser: self.formatter.stream_parser(),
        })
    }
}

impl std::fmt::Debug for ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModel")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("formatter", &self.formatter.name())
            .field("transport", &self.transport.name())
            .finish()
    }
}

/// A response arriving in pieces.
pub struct ResponseStream {
    rx: ChunkReceiver,
    parser: Box<dyn StreamParser>,
}

impl ResponseStream {
    /// Deltas from the next provider chunk; `None` once the stream ended.
    pub async fn next(&mut self) -> Option<Result<Vec<StreamDelta>, ProviderError>> {
        if self.parser.is_done() {
            return None;
        }
        match self.rx.recv().await? {
            Ok(chunk) => Some(Ok(self.parser.push(&chunk))),
            Err(e) => Some(Err(e)),
        }
    }

    /// Assemble the complete response from everything received.
    pub fn finish(self) -> ChatResponse {
        self.parser.finish()
    }
}
