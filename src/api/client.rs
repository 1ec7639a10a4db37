//! HTTP client for the notes backend JSON API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::conversation::{Assistant, Conversation, ConversationDetail, GlobalSettings, ModelInfo};

use super::{ApiError, ConversationApi, ConversationPatch, Envelope, NewConversation};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Backend API client with an optional bearer token
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Log in and keep the returned bearer token for later calls
    pub async fn login(&mut self, username: &str, password: &str) -> Result<String, ApiError> {
        let response = self
            .request(Method::POST, "/auth/login")
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        let login: LoginResponse = Self::decode(response).await?;
        tracing::info!(user = username, "Logged in to notes backend");
        self.token = Some(login.token.clone());
        Ok(login.token)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn envelope<T: DeserializeOwned>(response: Response) -> Result<Envelope<T>, ApiError> {
        let status = response.status();
        let body = response.text().await?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }

        match serde_json::from_str::<Envelope<T>>(&body) {
            Ok(envelope) => Ok(envelope),
            // A failed status without an envelope body
            Err(_) if !status.is_success() => Err(ApiError::Status {
                status: status.as_u16(),
                message: body,
            }),
            Err(e) => Err(ApiError::Decode(format!("{} - Body: {}", e, body))),
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        Self::envelope(response).await?.into_result()
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(Method::GET, path).send().await?;
        Self::decode(response).await
    }
}

#[async_trait]
impl ConversationApi for BackendClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get("/ai-conversations").await
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail, ApiError> {
        self.get(&format!("/ai-conversations/{id}")).await
    }

    async fn create_conversation(&self, new: &NewConversation) -> Result<Conversation, ApiError> {
        let response = self
            .request(Method::POST, "/ai-conversations")
            .json(new)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation, ApiError> {
        let response = self
            .request(Method::PUT, &format!("/ai-conversations/{id}"))
            .json(patch)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        let response = self
            .request(Method::DELETE, &format!("/ai-conversations/{id}"))
            .send()
            .await?;
        Self::envelope::<serde_json::Value>(response).await?.into_unit()
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ApiError> {
        self.get("/ai-models").await
    }

    async fn list_assistants(&self) -> Result<Vec<Assistant>, ApiError> {
        self.get("/ai-assistants").await
    }

    async fn get_settings(&self) -> Result<GlobalSettings, ApiError> {
        self.get("/ai-settings").await
    }
}
