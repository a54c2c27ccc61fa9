//! Inference service boundary.
//!
//! The agent only depends on [`InferenceClient`]; [`AnthropicClient`] is the
//! production implementation over HTTP.

mod anthropic;

use async_trait::async_trait;
use thiserror::Error;

use crate::conversation::Turn;
use crate::tools::ToolSchema;

pub use anthropic::AnthropicClient;

/// Failure of one inference call. Always fatal to the running loop.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("rate limited by inference service: {0}")]
    RateLimited(String),

    #[error("inference service returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed inference response: {0}")]
    MalformedResponse(String),
}

/// A stateless model endpoint: every call receives the whole transcript.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Produce the next assistant turn for `transcript`.
    async fn infer(
        &self,
        transcript: &[Turn],
        tools: &[ToolSchema],
        max_tokens: u32,
    ) -> Result<Turn, InferenceError>;
}
