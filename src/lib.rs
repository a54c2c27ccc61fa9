//! # Tool Agent
//!
//! An interactive command-line agent that chats with a remote model and lets
//! the model call local tools.
//!
//! This library provides:
//! - An append-only conversation transcript that stays valid model input
//! - A registry of local tools (read a file, list a directory)
//! - A client for the Anthropic Messages API
//! - The agent loop tying user input, inference and tool execution together
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tool_agent::agent::{Agent, AgentSettings};
//! use tool_agent::{console, llm::AnthropicClient, tools::ToolRegistry, Config};
//!
//! let config = Config::from_env()?;
//! let client = Arc::new(AnthropicClient::from_config(&config)?);
//! let mut agent = Agent::new(
//!     client,
//!     ToolRegistry::new(&config.workspace_path),
//!     Box::new(console::StdinReader::new()),
//!     Box::new(console::TerminalOutput::stdout()),
//!     AgentSettings { max_output_tokens: config.max_output_tokens },
//! );
//! agent.run().await?;
//! ```

pub mod agent;
pub mod config;
pub mod console;
pub mod conversation;
pub mod llm;
pub mod tools;

pub use config::Config;
