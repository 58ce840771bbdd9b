use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// One chat turn. Append-only per session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: String,
    pub content: String,
    /// Structured attachments such as file references.
    pub parts: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// A message that has not been written yet. Travels through the job queue.
///
/// Identity and timestamp are fixed when the turn happens, so a redelivered or
/// delayed write inserts the row once and keeps its place in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub parts: Value,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(session_id: Uuid, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: content.into(),
            parts: Value::Array(vec![]),
            metadata: Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn with_parts(mut self, parts: Value) -> Self {
        self.parts = parts;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turns_are_stamped_in_creation_order() {
        let session_id = Uuid::new_v4();
        let question = NewMessage::new(session_id, MessageRole::User, "Teach photosynthesis");
        let answer = NewMessage::new(session_id, MessageRole::Assistant, "Found 4 facts");

        assert_ne!(question.id, answer.id);
        assert!(question.created_at <= answer.created_at);
    }

    #[test]
    fn test_identity_survives_the_queue_payload() {
        let message = NewMessage::new(Uuid::new_v4(), MessageRole::User, "hello");
        let json = serde_json::to_string(&message).unwrap();
        let back: NewMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, message.id);
        assert_eq!(back.created_at, message.created_at);
    }
}
