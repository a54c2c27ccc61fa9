//! Anthropic Messages API client.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{InferenceClient, InferenceError};
use crate::config::Config;
use crate::conversation::{ContentBlock, Turn};
use crate::tools::ToolSchema;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Non-streaming client for `POST /v1/messages`.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    system_prompt: Option<String>,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            system_prompt: None,
        })
    }

    /// Build a client from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, InferenceError> {
        Ok(Self::new(
            config.api_key.clone(),
            config.model.clone(),
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_system_prompt(config.system_prompt.clone()))
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt.filter(|s| !s.trim().is_empty());
        self
    }

}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolSchema],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
}

fn no_tools(tools: &&[ToolSchema]) -> bool {
    tools.is_empty()
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

/// Map a Messages API response body to an assistant turn.
fn parse_response(body: &str) -> Result<Turn, InferenceError> {
    let response: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;

    if let Some(usage) = &response.usage {
        tracing::debug!(
            "Token usage: input={} output={} stop_reason={:?}",
            usage.input_tokens,
            usage.output_tokens,
            response.stop_reason
        );
    }

    let content: Vec<ContentBlock> = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(ContentBlock::Text { text }),
            ResponseBlock::ToolUse { id, name, input } => {
                // A request without arguments still needs an object on the way back.
                let input = if input.is_null() { json!({}) } else { input };
                Some(ContentBlock::ToolRequest { id, name, input })
            }
            ResponseBlock::Other => None,
        })
        .collect();

    if content.is_empty() {
        return Err(InferenceError::MalformedResponse(
            "response contained no text or tool_use blocks".to_string(),
        ));
    }

    let turn = Turn::assistant(content);
    let mut ids = HashSet::new();
    if let Some(dup) = turn.tool_request_ids().into_iter().find(|id| !ids.insert(*id)) {
        return Err(InferenceError::MalformedResponse(format!(
            "duplicate tool_use id in response: {}",
            dup
        )));
    }

    Ok(turn)
}

/// Classify the HTTP status of a Messages API response.
fn check_status(status: reqwest::StatusCode, body: String) -> Result<String, InferenceError> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(InferenceError::RateLimited(body));
    }
    if !status.is_success() {
        return Err(InferenceError::Api {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[async_trait]
impl InferenceClient for AnthropicClient {
    async fn infer(
        &self,
        transcript: &[Turn],
        tools: &[ToolSchema],
        max_tokens: u32,
    ) -> Result<Turn, InferenceError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: transcript,
            tools,
            system: self.system_prompt.as_deref(),
        };

        tracing::debug!(
            "Calling {} with {} turns and {} tools",
            self.model,
            transcript.len(),
            tools.len()
        );

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = check_status(status, response.text().await?)?;

        parse_response(&body)
    }
}
