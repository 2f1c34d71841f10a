use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat speaker role as the coder backend spells it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// One conversation thread scoping a message transcript.
///
/// Sessions are created and owned by the backend; the client only refetches
/// them, it never mutates one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One persisted chat message.
///
/// `claude_response` is the raw agent payload attached to assistant
/// messages; it is carried opaquely and never interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub role: ChatRole,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub claude_response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Returns true when the message was synthesized locally for an
    /// interrupted stream rather than persisted by the backend.
    pub fn is_aborted(&self) -> bool {
        self.metadata
            .get("aborted")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_decodes_with_missing_open_bags() {
        let raw = r#"{
            "id": "m1",
            "session_id": "s1",
            "content": "hi",
            "role": "user",
            "created_at": "2025-06-01T10:00:00Z"
        }"#;

        let message = serde_json::from_str::<ChatMessage>(raw).unwrap();
        assert_eq!(message.role, ChatRole::User);
        assert_eq!(message.metadata, serde_json::Value::Null);
        assert!(!message.is_aborted());
    }

    #[test]
    fn aborted_marker_round_trips_through_metadata() {
        let raw = r#"{
            "id": "aborted-x",
            "session_id": "s1",
            "content": "partial",
            "role": "assistant",
            "metadata": {"aborted": true},
            "claude_response": {},
            "created_at": "2025-06-01T10:00:00Z"
        }"#;

        let message = serde_json::from_str::<ChatMessage>(raw).unwrap();
        assert!(message.is_aborted());
    }
}
