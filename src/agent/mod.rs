//! Agent module - the interactive chat loop.
//!
//! The agent follows a "tools in a loop" pattern:
//! 1. Read a line from the user and append it to the transcript
//! 2. Call the model with the whole transcript and the available tools
//! 3. If the model requests tool calls, execute them and feed the results back
//! 4. Repeat step 2 until the model answers without tool calls, then go to step 1

mod agent_loop;
mod prompt;

pub use agent_loop::{Agent, AgentError, AgentSettings, LoopState};
pub use prompt::build_system_prompt;
