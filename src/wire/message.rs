//! Decoded shapes of stream-json lines and the stdin input encoding.
//!
//! Decoding is deliberately permissive: every field the orchestrator does not
//! need is optional or defaulted, so a new field on the wire never fails a
//! line. A `StreamMessage` lives only for the duration of one line.

use serde::{Deserialize, Serialize};

/// Token usage counters attached to an assistant message or a result line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

/// One content item inside an assistant or user message.
///
/// Tool results have appeared under two field spellings historically
/// (`tool_use_id` and `toolUseID`); both are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub text: Option<String>,
    /// Tool-use id on `tool_use` items.
    #[serde(default)]
    pub id: Option<String>,
    /// Tool name on `tool_use` items.
    #[serde(default)]
    pub name: Option<String>,
    /// Tool input on `tool_use` items.
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    /// Reference back to the originating tool use, modern spelling.
    #[serde(default)]
    pub tool_use_id: Option<String>,
    /// Reference back to the originating tool use, legacy spelling.
    #[serde(rename = "toolUseID", default)]
    pub tool_use_id_legacy: Option<String>,
}

impl ContentItem {
    /// The tool-use reference id, if either spelling is present.
    #[must_use]
    pub fn tool_use_reference(&self) -> Option<&str> {
        self.tool_use_id
            .as_deref()
            .or(self.tool_use_id_legacy.as_deref())
    }

    /// Returns true if this item reports a tool result.
    #[must_use]
    pub fn is_tool_result(&self) -> bool {
        self.item_type == "tool_result" || self.tool_use_reference().is_some()
    }
}

/// The nested `message` object of an assistant or user line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

/// Decoded shape of one stream-json line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// Discriminator: "system", "assistant", "user" or "result".
    #[serde(rename = "type", default)]
    pub message_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<MessageBody>,
    /// Structured tool-result detail on user lines.
    #[serde(default)]
    pub tool_use_result: Option<serde_json::Value>,
    /// Result-line fields.
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl StreamMessage {
    /// Returns true when a result line reports an error.
    ///
    /// Error results are recognized by subtype (anything containing
    /// "error"), an explicit `is_error` flag, or error text fields.
    #[must_use]
    pub fn is_error_result(&self) -> bool {
        if self.message_type != "result" {
            return false;
        }
        if self.is_error == Some(true) {
            return true;
        }
        if self
            .subtype
            .as_deref()
            .is_some_and(|s| s.contains("error"))
        {
            return true;
        }
        self.error.is_some() || self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Best available error text for an error-bearing result line.
    #[must_use]
    pub fn error_text(&self) -> String {
        if let Some(errors) = &self.errors {
            if !errors.is_empty() {
                return errors.join("; ");
            }
        }
        if let Some(error) = &self.error {
            return error.clone();
        }
        if let Some(result) = &self.result {
            return result.clone();
        }
        self.subtype
            .clone()
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

/// One content item of an outgoing user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// An inline image.
    Image {
        /// Base64 source descriptor.
        source: ImageSource,
    },
}

impl UserContent {
    /// Convenience constructor for a text item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Base64 image payload for an outgoing user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: String,
    pub media_type: String,
    pub data: String,
}

impl ImageSource {
    /// A base64 source with the given media type.
    #[must_use]
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source_type: "base64".to_string(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// Encode one user turn as a stream-json stdin line (without the newline).
///
/// # Errors
///
/// Returns a `serde_json::Error` if serialization fails.
pub fn encode_user_message(content: &[UserContent]) -> serde_json::Result<Vec<u8>> {
    let envelope = serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": content,
        },
    });
    serde_json::to_vec(&envelope)
}
