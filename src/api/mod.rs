//! Notes backend API boundary
//!
//! Every response arrives in a `{success, data?, error?, meta?}` envelope.
//! Envelopes are validated once here and turned into `Result<T, ApiError>`,
//! so nothing past this module looks at raw payloads.

pub mod client;
pub mod stream;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::conversation::{
    Assistant, Conversation, ConversationDetail, GlobalSettings, ModelInfo, StoredMessage,
};
use crate::providers::ProviderKind;

pub use client::BackendClient;
pub use stream::HttpTransport;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("backend error{}: {message}", .code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Backend {
        code: Option<String>,
        message: String,
    },

    #[error("response carried no data")]
    MissingData,

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("not logged in")]
    Unauthorized,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Message(String),
    Detailed {
        #[serde(default)]
        code: Option<String>,
        message: String,
    },
}

/// The backend's response envelope
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
    #[serde(default)]
    pub meta: Option<Value>,
}

impl<T> Envelope<T> {
    pub fn into_result(self) -> Result<T, ApiError> {
        self.check()?;
        self.data.ok_or(ApiError::MissingData)
    }

    /// For endpoints whose `data` is irrelevant
    pub fn into_unit(self) -> Result<(), ApiError> {
        self.check()
    }

    fn check(&self) -> Result<(), ApiError> {
        if self.success {
            return Ok(());
        }
        Err(match &self.error {
            Some(ErrorBody::Message(message)) => ApiError::Backend {
                code: None,
                message: message.clone(),
            },
            Some(ErrorBody::Detailed { code, message }) => ApiError::Backend {
                code: code.clone(),
                message: message.clone(),
            },
            None => ApiError::Backend {
                code: None,
                message: "unknown error".into(),
            },
        })
    }
}

/// Body for creating a conversation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<StoredMessage>,
}

/// Partial update of conversation metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderKind>,
}

/// Conversation history and catalog endpoints used by the chat session
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError>;

    async fn create_conversation(&self, new: &NewConversation) -> Result<Conversation, ApiError>;

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, ApiError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError>;

    async fn list_assistants(&self) -> Result<Vec<Assistant>, ApiError>;

    async fn get_settings(&self) -> Result<GlobalSettings, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope() {
        let env: Envelope<Vec<String>> =
            serde_json::from_str(r#"{"success": true, "data": ["a"], "meta": {"total": 1}}"#).unwrap();
        assert_eq!(env.meta.as_ref().unwrap()["total"], 1);
        assert_eq!(env.into_result().unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_failure_envelope_variants() {
        let env: Envelope<Value> =
            serde_json::from_str(r#"{"success": false, "error": "conversation not found"}"#).unwrap();
        match env.into_result() {
            Err(ApiError::Backend { code: None, message }) => {
                assert_eq!(message, "conversation not found")
            }
            other => panic!("unexpected {other:?}"),
        }

        let env: Envelope<Value> = serde_json::from_str(
            r#"{"success": false, "error": {"code": "FORBIDDEN", "message": "nope"}}"#,
        )
        .unwrap();
        let err = env.into_result().unwrap_err();
        assert_eq!(err.to_string(), "backend error [FORBIDDEN]: nope");
    }

    #[test]
    fn test_missing_data() {
        let env: Envelope<Value> = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(env.clone().into_unit().is_ok());
        assert!(matches!(env.into_result(), Err(ApiError::MissingData)));
    }
}
