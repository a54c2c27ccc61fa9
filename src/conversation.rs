//! Conversation transcript: turns, content blocks and the append-only log.
//!
//! The types serialize directly into the Messages API shape, so the
//! transcript can be sent to the inference service as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Author of a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Smallest addressable unit inside a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Human-readable text.
    Text { text: String },

    /// A request from the model to run a local tool.
    #[serde(rename = "tool_use")]
    ToolRequest {
        id: String,
        name: String,
        input: Value,
    },

    /// The outcome of a tool request, sent back on behalf of the user.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_request(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolRequest {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// One message-equivalent unit attributed to a role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Turn {
    /// A user turn holding a single text block.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// The synthetic user turn that carries tool results back to the model.
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// Ids of the tool requests in this turn, in emission order.
    pub fn tool_request_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolRequest { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    fn tool_result_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Violations of the transcript ordering contract.
///
/// Apart from `DuplicateRequestId`, which the agent reports as malformed model
/// output, these are programming errors in the loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("turn has no content blocks")]
    EmptyTurn,

    #[error("tool request block inside a user turn")]
    RequestInUserTurn,

    #[error("tool result block inside an assistant turn")]
    ResultInAssistantTurn,

    #[error("user turn mixes tool results with other content")]
    MixedResultTurn,

    #[error("expected a user turn answering tool requests {0:?}")]
    UnansweredRequests(Vec<String>),

    #[error("tool results {got:?} do not answer requests {expected:?}")]
    ResultMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("duplicate tool request id: {0}")]
    DuplicateRequestId(String),

    #[error("last turn is not an assistant turn")]
    MissingAssistantTurn,
}

/// Ordered, append-only log of every turn in one session.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    turns: Vec<Turn>,
    seen_request_ids: std::collections::HashSet<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Request ids of the last turn that still await results.
    pub fn pending_request_ids(&self) -> Vec<String> {
        match self.turns.last() {
            Some(turn) if turn.role == Role::Assistant => turn
                .tool_request_ids()
                .into_iter()
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Append a turn after checking it against the ordering invariants.
    pub fn push(&mut self, turn: Turn) -> Result<(), TranscriptError> {
        if turn.content.is_empty() {
            return Err(TranscriptError::EmptyTurn);
        }

        let pending = self.pending_request_ids();

        match turn.role {
            Role::Assistant => {
                if !pending.is_empty() {
                    return Err(TranscriptError::UnansweredRequests(pending));
                }
                if turn
                    .content
                    .iter()
                    .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
                {
                    return Err(TranscriptError::ResultInAssistantTurn);
                }
                let mut fresh = std::collections::HashSet::new();
                for id in turn.tool_request_ids() {
                    if self.seen_request_ids.contains(id) || !fresh.insert(id.to_string()) {
                        return Err(TranscriptError::DuplicateRequestId(id.to_string()));
                    }
                }
                self.seen_request_ids.extend(fresh);
            }
            Role::User => {
                if turn
                    .content
                    .iter()
                    .any(|b| matches!(b, ContentBlock::ToolRequest { .. }))
                {
                    return Err(TranscriptError::RequestInUserTurn);
                }
                let results = turn.tool_result_ids();
                if !results.is_empty() && results.len() != turn.content.len() {
                    return Err(TranscriptError::MixedResultTurn);
                }
                if pending.is_empty() {
                    if !results.is_empty() {
                        return Err(TranscriptError::ResultMismatch {
                            expected: Vec::new(),
                            got: results.into_iter().map(String::from).collect(),
                        });
                    }
                } else if results != pending {
                    if results.is_empty() {
                        return Err(TranscriptError::UnansweredRequests(pending));
                    }
                    return Err(TranscriptError::ResultMismatch {
                        expected: pending,
                        got: results.into_iter().map(String::from).collect(),
                    });
                }
            }
        }

        self.turns.push(turn);
        Ok(())
    }
}
