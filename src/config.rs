//! Configuration management for the tool agent.
//!
//! Configuration can be set via environment variables:
//! - `ANTHROPIC_API_KEY` - Required. Your Anthropic API key.
//! - `ANTHROPIC_MODEL` - Optional. Model identifier. Defaults to `claude-3-5-haiku-20241022`.
//! - `ANTHROPIC_BASE_URL` - Optional. API base URL. Defaults to `https://api.anthropic.com`.
//! - `MAX_OUTPUT_TOKENS` - Optional. Output token limit per inference call. Defaults to `1024`.
//! - `REQUEST_TIMEOUT_SECS` - Optional. HTTP request timeout. Defaults to `120`.
//! - `WORKSPACE_PATH` - Optional. Base directory for relative tool paths.
//!   Defaults to current directory.
//! - `SYSTEM_PROMPT` - Optional. Replaces the built-in system prompt.

use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Anthropic API key
    pub api_key: String,

    /// Model identifier sent with every inference call
    pub model: String,

    /// Inference service base URL
    pub base_url: String,

    /// Output token limit per inference call
    pub max_output_tokens: u32,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,

    /// Workspace directory for file tools
    pub workspace_path: PathBuf,

    /// Explicit system prompt (the built-in one is used when unset)
    pub system_prompt: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `ANTHROPIC_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("ANTHROPIC_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;

        let model = lookup("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let base_url = lookup("ANTHROPIC_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let max_output_tokens = parse_or(
            "MAX_OUTPUT_TOKENS",
            lookup("MAX_OUTPUT_TOKENS"),
            DEFAULT_MAX_OUTPUT_TOKENS,
        )?;
        if max_output_tokens == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_OUTPUT_TOKENS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let request_timeout_secs = parse_or(
            "REQUEST_TIMEOUT_SECS",
            lookup("REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;

        let workspace_path = lookup("WORKSPACE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let system_prompt = lookup("SYSTEM_PROMPT");

        Ok(Self {
            api_key,
            model,
            base_url,
            max_output_tokens,
            request_timeout_secs,
            workspace_path,
            system_prompt,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, model: String, workspace_path: PathBuf) -> Self {
        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            workspace_path,
            system_prompt: None,
        }
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}
