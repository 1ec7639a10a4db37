//! Server-sent-events transport for the streaming chat endpoint
//!
//! Each `data:` event carries a JSON object
//! `{content?, done?, conversationId?, error?}`; a bare `[DONE]` also ends
//! the stream.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;

use crate::core::stream::{ChatRequestBody, ChatTransport, ChunkStream, StreamChunk, TransportError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChunk {
    #[serde(default, alias = "delta")]
    content: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpTransport {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpTransport {
    /// `url` is the full streaming endpoint URL
    pub fn new(url: impl Into<String>, token: Option<String>) -> Result<Self, TransportError> {
        // no overall timeout: the turn deadline is enforced by the caller
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

/// Decode one SSE data payload
fn parse_event(data: &str) -> Option<Result<StreamChunk, TransportError>> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(StreamChunk::done(None)));
    }

    let wire: WireChunk = match serde_json::from_str(data) {
        Ok(wire) => wire,
        Err(e) => {
            return Some(Err(TransportError::Malformed(format!(
                "{} - Data: {}",
                e, data
            ))))
        }
    };
    if let Some(error) = wire.error.filter(|e| !e.is_empty()) {
        return Some(Err(TransportError::Upstream(error)));
    }
    Some(Ok(StreamChunk {
        delta: wire.content.unwrap_or_default(),
        done: wire.done,
        conversation_id: wire.conversation_id,
    }))
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, request: &ChatRequestBody) -> Result<ChunkStream, TransportError> {
        tracing::info!(
            provider = %request.provider,
            model = %request.model,
            messages = request.messages.len(),
            "Opening chat stream"
        );

        let mut builder = self
            .client
            .post(&self.url)
            .header("Accept", "text/event-stream")
            .json(request);
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<Failed to read error body>".to_string());
            tracing::error!("Chat stream request failed with status {}: {}", status, body);
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chunks = response
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(event) => parse_event(&event.data),
                    Err(e) => Some(Err(TransportError::Malformed(e.to_string()))),
                }
            });

        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stream::{self, ChatOptions, StreamHandler, TurnOutcome, DEFAULT_STREAM_TIMEOUT};
    use crate::providers::ProviderKind;
    use axum::{
        http::{header, StatusCode},
        response::IntoResponse,
        routing::post,
        Router,
    };
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_parse_event_variants() {
        assert!(parse_event("  ").is_none());
        assert_eq!(parse_event("[DONE]").unwrap().unwrap(), StreamChunk::done(None));

        let chunk = parse_event(r#"{"content":"Hi","conversationId":"c1"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.delta, "Hi");
        assert_eq!(chunk.conversation_id.as_deref(), Some("c1"));
        assert!(!chunk.done);

        assert!(matches!(
            parse_event(r#"{"error":"quota exceeded"}"#),
            Some(Err(TransportError::Upstream(_)))
        ));
        assert!(matches!(
            parse_event("not json"),
            Some(Err(TransportError::Malformed(_)))
        ));
    }

    #[derive(Default)]
    struct Collect {
        text: String,
        error: Option<String>,
    }

    impl StreamHandler for Collect {
        fn on_chunk(&mut self, delta: &str, _is_done: bool, _conversation_id: Option<&str>) {
            self.text.push_str(delta);
        }

        fn on_complete(&mut self, _conversation_id: Option<&str>) {}

        fn on_error(&mut self, error: &TransportError) {
            self.error = Some(error.to_string());
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn body() -> ChatRequestBody {
        ChatRequestBody {
            provider: ProviderKind::DeepSeek,
            model: "deepseek-chat".into(),
            conversation_id: None,
            messages: vec![],
            images: vec![],
            options: ChatOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_streams_sse_from_backend() {
        let app = Router::new().route(
            "/ai-chat/stream",
            post(|| async {
                let sse = concat!(
                    "data: {\"content\":\"你好\"}\n\n",
                    "data: {\"content\":\"，世界\"}\n\n",
                    "data: {\"done\":true,\"conversationId\":\"conv-42\"}\n\n",
                );
                ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
            }),
        );
        let url = serve(app).await;
        let transport = HttpTransport::new(format!("{url}/ai-chat/stream"), None).unwrap();

        let mut collect = Collect::default();
        let outcome = stream::stream(
            &transport,
            &body(),
            &mut collect,
            &CancellationToken::new(),
            DEFAULT_STREAM_TIMEOUT,
        )
        .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Completed { conversation_id: Some(ref id) } if id == "conv-42"
        ));
        assert_eq!(collect.text, "你好，世界");
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let app = Router::new().route(
            "/ai-chat/stream",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model offline") }),
        );
        let url = serve(app).await;
        let transport = HttpTransport::new(format!("{url}/ai-chat/stream"), Some("t".into())).unwrap();

        let mut collect = Collect::default();
        let outcome = stream::stream(
            &transport,
            &body(),
            &mut collect,
            &CancellationToken::new(),
            DEFAULT_STREAM_TIMEOUT,
        )
        .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Errored {
                error: TransportError::Status { status: 500, .. },
                ..
            }
        ));
        assert_eq!(collect.error.as_deref(), Some("HTTP 500: model offline"));
    }
}
