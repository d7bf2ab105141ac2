//! Conversation turn history.

use serde::{Deserialize, Serialize};

use crate::wire::UserContent;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One complete turn in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    /// Structured content for user turns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<UserContent>,
    /// Accumulated text for assistant turns.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
}

impl Turn {
    /// A user turn from structured content items.
    #[must_use]
    pub fn user(content: Vec<UserContent>) -> Self {
        Self {
            role: Role::User,
            content,
            text: String::new(),
        }
    }

    /// An assistant turn from accumulated response text.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Vec::new(),
            text: text.into(),
        }
    }
}
