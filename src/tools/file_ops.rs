//! Filesystem tools: read a file, list a directory tree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::{Tool, ToolError};

/// Upper bound on entries returned by `list_files`.
const MAX_LIST_ENTRIES: usize = 1000;

/// Resolve a model-supplied path against the workspace.
fn resolve_path(workspace: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadFileArgs {
    path: String,
}

/// Read the full contents of a file.
pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a given relative file path. Use this when you want to see what's inside a file. Do not use this with directory names."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The relative path of a file in the working directory."
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> Result<String, ToolError> {
        let args: ReadFileArgs = serde_json::from_value(args)?;
        let full_path = resolve_path(workspace, &args.path);

        tracing::debug!("Reading file: {}", full_path.display());

        let bytes = tokio::fs::read(&full_path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.path, e))?;

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListFilesArgs {
    #[serde(default)]
    path: Option<String>,
}

/// List files and directories below a path.
pub struct ListFiles;

#[async_trait]
impl Tool for ListFiles {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories at a given path. If no path is provided, lists files in the current directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Optional relative path to list files from. Defaults to current directory if not provided."
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> Result<String, ToolError> {
        let args: ListFilesArgs = if args.is_null() {
            ListFilesArgs::default()
        } else {
            serde_json::from_value(args)?
        };
        let root = resolve_path(workspace, args.path.as_deref().unwrap_or("."));

        if !root.is_dir() {
            return Err(anyhow::anyhow!("Not a directory: {}", root.display()).into());
        }

        let walk_root = root.clone();
        let entries = tokio::task::spawn_blocking(move || list_tree(&walk_root))
            .await
            .map_err(|e| anyhow::anyhow!("Listing task failed: {}", e))??;

        Ok(serde_json::to_string(&entries).map_err(anyhow::Error::from)?)
    }
}

fn list_tree(root: &Path) -> Result<Vec<String>, ToolError> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(anyhow::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(anyhow::Error::from)?
            .to_string_lossy()
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            entries.push(format!("{}/", relative));
        } else {
            entries.push(relative);
        }

        if entries.len() >= MAX_LIST_ENTRIES {
            tracing::warn!("list_files truncated at {} entries", MAX_LIST_ENTRIES);
            break;
        }
    }

    Ok(entries)
}
