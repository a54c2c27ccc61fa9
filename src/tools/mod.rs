//! Tool registry and the tool contract.
//!
//! Tools are registered once when the registry is built and the registry is
//! then handed to the agent; nothing registers tools afterwards.

mod file_ops;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use file_ops::{ListFiles, ReadFile};

/// Failure of a single tool invocation.
///
/// Every variant is recoverable: the agent reports it back to the model as an
/// error result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found")]
    NotFound,

    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] serde_json::Error),

    #[error("{0:#}")]
    Execution(#[from] anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),
}

/// A local capability the model may ask to run.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to address the tool.
    fn name(&self) -> &str;

    /// Natural-language description sent to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the expected arguments.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. Arguments are untrusted and must be validated here.
    async fn execute(&self, args: Value, workspace: &Path) -> Result<String, ToolError>;
}

/// Name and description of a registered tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Tool definition as advertised to the inference service.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Fixed set of tools available to the agent.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    workspace: PathBuf,
}

impl ToolRegistry {
    /// Registry with the built-in tools, resolving relative paths against `workspace`.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let mut registry = Self::empty(workspace);
        let builtins: Vec<Arc<dyn Tool>> = vec![Arc::new(ReadFile), Arc::new(ListFiles)];
        for tool in builtins {
            if let Err(e) = registry.register(tool) {
                tracing::warn!("Skipping built-in tool: {}", e);
            }
        }
        registry
    }

    /// Registry with no tools.
    pub fn empty(workspace: impl Into<PathBuf>) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            workspace: workspace.into(),
        }
    }

    /// Add a tool. Names must be unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Registered tools in registration order.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// Schemas for every registered tool, in registration order.
    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect()
    }

    /// Run the named tool with raw model-supplied arguments.
    pub async fn execute(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self.lookup(name).ok_or(ToolError::NotFound)?;
        tool.execute(args, &self.workspace).await
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }
}
