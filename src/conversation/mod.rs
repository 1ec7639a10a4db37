//! Conversation types shared by the store, builder and API layers

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::providers::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    #[serde(alias = "assistant")]
    Model,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Model => "model",
        }
    }

    /// Role name expected by the streaming endpoint
    pub fn wire_name(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Model => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quick-action affordance shown under the greeting message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub icon: String,
    pub label: String,
    pub prompt: String,
}

/// One turn in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_bookmarked: bool,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<Suggestion>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub reactions: BTreeSet<String>,
    /// Language code to translated text
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub translations: BTreeMap<String, String>,
    /// Earlier texts of a regenerated reply, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
    /// Number of images sent with a user turn
    #[serde(default)]
    pub image_count: usize,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            is_bookmarked: false,
            is_pinned: false,
            rating: None,
            response_time_ms: None,
            token_count: None,
            suggestions: Vec::new(),
            reactions: BTreeSet::new(),
            translations: BTreeMap::new(),
            versions: Vec::new(),
            image_count: 0,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Empty model message appended when a turn starts
    pub fn placeholder() -> Self {
        Self::model(String::new())
    }

    pub fn with_suggestions(mut self, suggestions: Vec<Suggestion>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn is_greeting(&self) -> bool {
        !self.suggestions.is_empty()
    }

    /// Copy with a fresh identity, used when seeding a forked conversation
    pub fn detached(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            ..self.clone()
        }
    }
}

/// Conversation metadata as persisted by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message as stored by the backend conversation history API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        let mut message = Message::new(stored.role, stored.content);
        if let Some(created_at) = stored.created_at {
            message.timestamp = created_at;
        }
        if let Some(meta) = stored.metadata.as_ref() {
            message.is_bookmarked = meta["isBookmarked"].as_bool().unwrap_or(false);
            message.is_pinned = meta["isPinned"].as_bool().unwrap_or(false);
            message.rating = meta["rating"]
                .as_u64()
                .and_then(|r| u8::try_from(r).ok())
                .filter(|r| (1..=5).contains(r));
            message.response_time_ms = meta["responseTime"].as_u64();
            message.token_count = meta["tokenCount"].as_u64();
        }
        message
    }
}

impl From<&Message> for StoredMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: None,
            role: message.role,
            content: message.text.clone(),
            created_at: Some(message.timestamp),
            metadata: Some(serde_json::json!({
                "isBookmarked": message.is_bookmarked,
                "isPinned": message.is_pinned,
                "rating": message.rating,
                "responseTime": message.response_time_ms,
                "tokenCount": message.token_count,
            })),
        }
    }
}

/// Conversation metadata together with its history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

/// A reusable persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assistant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub is_default: bool,
}

/// The default assistant, or the first one when none is flagged
pub fn default_assistant(assistants: &[Assistant]) -> Option<&Assistant> {
    assistants
        .iter()
        .find(|a| a.is_default)
        .or_else(|| assistants.first())
}

/// A provider-bound model identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_id: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub supports_image: bool,
    #[serde(default = "default_true")]
    pub supports_text: bool,
    #[serde(default)]
    pub context_window: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// Global chat settings reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub default_provider: Option<ProviderKind>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_accepts_assistant_alias() {
        let role: Role = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(role, Role::Model);
        assert_eq!(Role::Model.wire_name(), "assistant");
    }

    #[test]
    fn test_stored_message_metadata() {
        let json = r#"{
            "role": "model",
            "content": "Hi",
            "createdAt": "2024-05-01T10:00:00Z",
            "metadata": {"isBookmarked": true, "rating": 9, "responseTime": 1200}
        }"#;
        let stored: StoredMessage = serde_json::from_str(json).unwrap();
        let message = Message::from(stored);
        assert!(message.is_bookmarked);
        assert_eq!(message.rating, None);
        assert_eq!(message.response_time_ms, Some(1200));
        assert_eq!(message.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_default_assistant_prefers_flag() {
        let mk = |id: &str, is_default| Assistant {
            id: id.into(),
            name: id.into(),
            system_prompt: String::new(),
            model: None,
            provider: None,
            is_system: false,
            is_default,
        };
        let assistants = vec![mk("a", false), mk("b", true)];
        assert_eq!(default_assistant(&assistants).unwrap().id, "b");
        assert_eq!(default_assistant(&assistants[..1]).unwrap().id, "a");
        assert!(default_assistant(&[]).is_none());
    }
}
