//! Typed chunks of streamed response output.
//!
//! One wire line decodes into zero or more chunks. Chunks for a single line
//! are always delivered in parser order, and `Done` is always the final
//! chunk on a response channel.

use serde::{Deserialize, Serialize};

/// Status of a single todo item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// One entry in a `TodoWrite` update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Task description.
    pub content: String,
    /// Current status.
    pub status: TodoStatus,
    /// Present-tense form shown while the item is in progress.
    #[serde(rename = "activeForm", default)]
    pub active_form: String,
}

/// Structured detail attached to a tool result, when the wire line carries it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultDetail {
    /// Number of lines returned by a file read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_lines: Option<u64>,
    /// Whether an edit was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_applied: Option<bool>,
    /// Number of matches from a search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_count: Option<u64>,
    /// Number of files touched by a search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_count: Option<u64>,
    /// Exit code of a shell command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
}

impl ToolResultDetail {
    /// Returns true if no field is populated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_lines.is_none()
            && self.edit_applied.is_none()
            && self.match_count.is_none()
            && self.file_count.is_none()
            && self.exit_code.is_none()
    }
}

/// One typed unit of streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseChunk {
    /// Plain response text.
    Text {
        /// The text fragment.
        text: String,
    },
    /// A tool invocation the subprocess started.
    ToolUse {
        /// Tool name (e.g. "Read", "Bash").
        name: String,
        /// Short human-readable summary of the tool input.
        summary: String,
        /// Identifier correlating with a later `ToolResult`.
        id: String,
    },
    /// Result of an earlier tool invocation.
    ToolResult {
        /// Identifier of the originating tool use.
        tool_use_id: String,
        /// Structured detail, when the line carried any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<ToolResultDetail>,
    },
    /// Replacement of the current todo list.
    TodoUpdate {
        /// Ordered items.
        items: Vec<TodoItem>,
    },
    /// Running token/cost totals for the in-flight request.
    StreamStats {
        /// Cumulative output tokens across all sub-calls so far.
        output_tokens: u64,
        /// Total cost in USD, known only once a result line arrives.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost_usd: Option<f64>,
    },
    /// Terminal: the turn completed.
    Done,
    /// Terminal: the turn failed.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

impl ResponseChunk {
    /// Returns true for the terminal `Done` and `Error` variants.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }

    /// Convenience constructor for a text chunk.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}
