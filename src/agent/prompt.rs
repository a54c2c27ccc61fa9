//! Default system prompt for the chat agent.

use crate::tools::ToolRegistry;

/// Build the system prompt with the workspace and tool list.
pub fn build_system_prompt(tools: &ToolRegistry) -> String {
    let tool_descriptions = tools
        .list_tools()
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a helpful assistant chatting with a user in a terminal. Relative file paths are resolved against: {workspace}

You can call these tools:
{tool_descriptions}

Use a tool when the answer depends on something you can look up locally, instead of guessing. If a tool reports an error, read it and decide whether to try differently or explain the problem to the user."#,
        workspace = tools.workspace().display(),
        tool_descriptions = tool_descriptions
    )
}
