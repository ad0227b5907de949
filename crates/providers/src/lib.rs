//! Provider format adapters and HTTP transport for Reagent.
//!
//! Every adapter implements `reagent_core::Formatter`; [`HttpTransport`]
//! implements `reagent_core::Transport`. A [`ChatModel`] pairs the two, and
//! the router builds models from configuration.

pub mod anthropic;
pub mod dashscope;
pub mod gemini;
pub mod media;
pub mod model;
pub mod multi_agent;
pub mod openai;
mod response;
pub mod router;
pub mod schema;
pub mod sse;
pub mod transport;

pub use anthropic::AnthropicFormatter;
pub use dashscope::DashScopeFormatter;
pub use gemini::GeminiFormatter;
pub use model::{ChatModel, ResponseStream};
pub use multi_agent::MultiAgentFormatter;
pub use openai::OpenAiFormatter;
pub use router::{ModelRouter, build_from_config, build_model};
pub use schema::{SchemaPolicy, wrap_schema};
pub use transport::{AuthStyle, HttpTransport};
