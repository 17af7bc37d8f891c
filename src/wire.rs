//! Wire contract of the conversation backend.
//!
//! The backend accepts a JSON [`ConversationRequest`] and answers either with a
//! single JSON [`ConversationReply`] or with a `text/event-stream` body made of
//! blank-line separated blocks:
//!
//! ```text
//! event: progress
//! data: {"params":{"progress":0.5}}
//!
//! data: {"text":"partial answer"}
//!
//! event: done
//! data: {}
//! ```
//!
//! # Example
//!
//! ```rust
//! use agent_chat_client::wire::encode_block;
//!
//! let block = encode_block(Some("done"), "{}");
//! assert_eq!(block, "event: done\ndata: {}\n\n");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal data payload that terminates a stream regardless of event name.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Separator placed between the parts of a multi-part JSON reply.
pub const REPLY_PART_SEPARATOR: &str = "\n\n";

// =============================================================================
// Request
// =============================================================================

/// Body of the outbound conversation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRequest {
    /// The user's message, verbatim.
    pub user_query: String,
    /// Optional client identifier; serialized as `null` when absent.
    pub client_id: Option<String>,
}

// =============================================================================
// JSON reply
// =============================================================================

/// Single-shot JSON reply.
///
/// `llm_response` is either a string or an array of strings. Anything else is
/// coerced to text by [`ConversationReply::text`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationReply {
    /// Raw reply payload.
    #[serde(default)]
    pub llm_response: Value,
}

impl ConversationReply {
    /// Collapse the reply into the text shown to the user.
    ///
    /// Arrays are joined with a blank line; `null`/missing becomes empty.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.llm_response {
            Value::Array(parts) => parts
                .iter()
                .map(value_text)
                .collect::<Vec<_>>()
                .join(REPLY_PART_SEPARATOR),
            other => value_text(other),
        }
    }
}

/// Text form of a JSON value: strings unquoted, `null` empty, others as JSON.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// =============================================================================
// Event stream encoding
// =============================================================================

/// Encode one event stream block.
///
/// Multi-line data is split over several `data:` lines so that a decoder
/// rejoining them with `\n` recovers the original text.
#[must_use]
pub fn encode_block(event: Option<&str>, data: &str) -> String {
    let mut out = String::new();
    if let Some(name) = event {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    for line in data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    out
}

/// Encode a block whose data is a JSON value.
#[must_use]
pub fn encode_json_block(event: Option<&str>, data: &Value) -> String {
    encode_block(event, &data.to_string())
}
