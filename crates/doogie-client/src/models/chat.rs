use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a transcript message. Immutable for the life of the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// User feedback on an assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
}

/// A single transcript message.
///
/// Assistant-only metadata fields are all absent while a stream is in
/// progress and reflect the server's final values once it completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Chunk ids cited by the assistant reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_documents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_text: Option<String>,
    #[serde(default)]
    pub reviewed: bool,
}

impl Message {
    /// Optimistic user message appended before server confirmation.
    pub fn optimistic_user(chat_id: &str, content: &str) -> Self {
        Self::optimistic(chat_id, Role::User, content.to_string(), Utc::now())
    }

    /// Optimistic assistant placeholder that becomes the streaming target.
    /// Timestamped just after the paired user message so transcript ordering
    /// by creation time keeps the pair adjacent.
    pub fn optimistic_assistant(chat_id: &str, after: DateTime<Utc>) -> Self {
        Self::optimistic(
            chat_id,
            Role::Assistant,
            String::new(),
            after + Duration::milliseconds(1),
        )
    }

    fn optimistic(chat_id: &str, role: Role, content: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role,
            content,
            created_at,
            tokens: None,
            tokens_per_second: None,
            model: None,
            provider: None,
            context_documents: None,
            feedback: None,
            feedback_text: None,
            reviewed: false,
        }
    }
}

/// Lightweight chat metadata used for the sidebar list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A chat with its full message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Chat {
    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

}

/// Authenticated user profile from `/users/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimistic_pair_preserves_ordering() {
        let user = Message::optimistic_user("c1", "hello");
        let assistant = Message::optimistic_assistant("c1", user.created_at);
        assert!(assistant.created_at > user.created_at);
        assert_eq!(assistant.role, Role::Assistant);
        assert!(assistant.content.is_empty());
        assert_ne!(user.id, assistant.id);
    }

    #[test]
    fn test_message_deserializes_without_metadata() {
        let json = r#"{
            "id": "m1",
            "chat_id": "c1",
            "role": "assistant",
            "content": "Hi",
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.tokens.is_none());
        assert!(msg.feedback.is_none());
        assert!(!msg.reviewed);
    }
}
