//! HTTP transport over reqwest.
//!
//! Moves formatted request bodies to a provider endpoint. Supports:
//! - Per-family authentication headers
//! - `{model}` substitution in endpoint URLs
//! - A separate streaming endpoint (Gemini) and a media endpoint (DashScope multimodal)
//! - SSE streaming into a bounded channel of JSON chunks

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reagent_core::error::ProviderError;
use reagent_core::provider::{ChunkReceiver, ProviderRequest, Transport};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::anthropic::ANTHROPIC_VERSION;
use crate::dashscope::uses_multimodal;
use crate::sse::SseDecoder;

const STREAM_CHANNEL_CAPACITY: usize = 64;

/// How the API key is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>` plus `anthropic-version`
    AnthropicKey,
    /// `x-goog-api-key: <key>`
    GoogApiKey,
    None,
}

/// A JSON-over-HTTP provider endpoint.
pub struct HttpTransport {
    name: String,
    url: String,
    stream_url: Option<String>,
    media_url: Option<String>,
    route_media: Option<fn(&Value) -> bool>,
    auth: AuthStyle,
    api_key: String,
    model_in_body: bool,
    stream_headers: Vec<(&'static str, &'static str)>,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport posting to `url`. `{model}` in the URL is replaced
    /// by the request's model.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        auth: AuthStyle,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            url: url.into(),
            stream_url: None,
            media_url: None,
            route_media: None,
            auth,
            api_key: api_key.into(),
            model_in_body: true,
            stream_headers: Vec::new(),
            client,
        }
    }

    /// OpenAI chat completions (convenience constructor).
    pub fn openai(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Self {
        let base = base_url.trim_end_matches('/');
        Self::new(
            "openai-http",
            format!("{base}/chat/completions"),
            AuthStyle::Bearer,
            api_key,
            timeout,
        )
    }

    /// Anthropic Messages API (convenience constructor).
    pub fn anthropic(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Self {
        let base = base_url.trim_end_matches('/');
        Self::new(
            "anthropic-http",
            format!("{base}/messages"),
            AuthStyle::AnthropicKey,
            api_key,
            timeout,
        )
    }

    /// Gemini `generateContent` (convenience constructor).
    pub fn gemini(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Self {
        let base = base_url.trim_end_matches('/');
        let mut transport = Self::new(
            "gemini-http",
            format!("{base}/models/{{model}}:generateContent"),
            AuthStyle::GoogApiKey,
            api_key,
            timeout,
        )
        .with_stream_url(format!("{base}/models/{{model}}:streamGenerateContent?alt=sse"));
        transport.model_in_body = false;
        transport
    }

    /// DashScope generation (convenience constructor). Bodies with list
    /// content go to the multimodal endpoint.
    pub fn dashscope(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Self {
        let base = base_url.trim_end_matches('/');
        Self::new(
            "dashscope-http",
            format!("{base}/services/aigc/text-generation/generation"),
            AuthStyle::Bearer,
            api_key,
            timeout,
        )
        .with_media_route(
            format!("{base}/services/aigc/multimodal-generation/generation"),
            uses_multimodal,
        )
        .with_stream_header("X-DashScope-SSE", "enable")
    }

    pub fn with_stream_url(mut self, url: impl Into<String>) -> Self {
        self.stream_url = Some(url.into());
        self
    }

    /// Send bodies for which `route` returns true to `url` instead.
    pub fn with_media_route(mut self, url: impl Into<String>, route: fn(&Value) -> bool) -> Self {
        self.media_url = Some(url.into());
        self.route_media = Some(route);
        self
    }

    pub fn with_stream_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.stream_headers.push((name, value));
        self
    }

    /// The endpoint a request goes to.
    pub fn endpoint(&self, request: &ProviderRequest) -> String {
        let template = match (&self.media_url, self.route_media) {
            (Some(url), Some(route)) if route(&request.body) => url,
            _ if request.stream => self.stream_url.as_ref().unwrap_or(&self.url),
            _ => &self.url,
        };
        template.replace("{model}", &request.model)
    }

    fn build(&self, request: &ProviderRequest) -> reqwest::RequestBuilder {
        let url = self.endpoint(request);
        let mut body = request.body.clone();
        if self.model_in_body {
            body["model"] = Value::String(request.model.clone());
        }

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        builder = match self.auth {
            AuthStyle::Bearer => builder.header("Authorization", format!("Bearer {}", self.api_key)),
            AuthStyle::AnthropicKey => builder
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            AuthStyle::GoogApiKey => builder.header("x-goog-api-key", &self.api_key),
            AuthStyle::None => builder,
        };

        if request.stream {
            builder = builder.header("Accept", "text/event-stream");
            for (name, value) in &self.stream_headers {
                builder = builder.header(*name, *value);
            }
        }

        builder.json(&body)
    }

    async fn dispatch(&self, request: &ProviderRequest) -> Result<reqwest::Response, ProviderError> {
        let response = self.build(request).send().await.map_err(request_error)?;

        let status = response.status().as_u16();
        if status == 200 {
            return Ok(response);
        }
        let error_body = response.text().await.unwrap_or_default();
        warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
        Err(status_error(status, error_body))
    }
}

fn request_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Map a non-200 status onto the provider error taxonomy.
fn status_error(status: u16, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: 5,
        },
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

/// Parse one SSE payload. Returns `None` for the `[DONE]` sentinel.
fn parse_event(data: &str) -> Option<Result<Value, String>> {
    let data = data.trim();
    if data == "[DONE]" {
        return None;
    }
    Some(serde_json::from_str(data).map_err(|e| e.to_string()))
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: ProviderRequest) -> Result<Value, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");
        let response = self.dispatch(&request).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");
        let response = self.dispatch(&request).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and forward JSON chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for data in decoder.push(&bytes) {
                    match parse_event(&data) {
                        None => return,
                        Some(Ok(chunk)) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        Some(Err(e)) => {
                            trace!(provider = %provider_name, error = %e, data = %data, "Skipping unparseable SSE chunk");
                        }
                    }
                }
            }

            if let Some(data) = decoder.finish() {
                if let Some(Ok(chunk)) = parse_event(&data) {
                    let _ = tx.send(Ok(chunk)).await;
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value, stream: bool) -> ProviderRequest {
        ProviderRequest {
            model: "m-1".into(),
            body,
            stream,
        }
    }

    #[test]
    fn endpoint_resolution() {
        let timeout = Duration::from_secs(5);
        let openai = HttpTransport::openai("https://api.openai.com/v1/", "k", timeout);
        assert_eq!(
            openai.endpoint(&request(json!({}), true)),
            "https://api.openai.com/v1/chat/completions"
        );

        let gemini = HttpTransport::gemini("https://g/v1beta", "k", timeout);
        assert_eq!(
            gemini.endpoint(&request(json!({}), false)),
            "https://g/v1beta/models/m-1:generateContent"
        );
        assert_eq!(
            gemini.endpoint(&request(json!({}), true)),
            "https://g/v1beta/models/m-1:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn dashscope_routes_media_bodies() {
        let dash = HttpTransport::dashscope("https://d/api/v1", "k", Duration::from_secs(5));
        let text = json!({"input": {"messages": [{"role": "user", "content": "hi"}]}});
        let media = json!({"input": {"messages": [{"role": "user", "content": [{"text": "hi"}]}]}});
        assert!(dash.endpoint(&request(text, false)).ends_with("text-generation/generation"));
        assert!(dash.endpoint(&request(media, true)).ends_with("multimodal-generation/generation"));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(status_error(429, String::new()), ProviderError::RateLimited { .. }));
        assert!(matches!(status_error(401, String::new()), ProviderError::AuthenticationFailed(_)));
        match status_error(500, "boom".into()) {
            ProviderError::ApiError { status_code, message } => {
                assert_eq!(status_code, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn done_sentinel_and_bad_chunks() {
        assert!(parse_event(" [DONE]").is_none());
        assert!(matches!(parse_event("{\"a\":1}"), Some(Ok(_))));
        assert!(matches!(parse_event("not json"), Some(Err(_))));
    }
}
