//! Streaming transport for one chat turn
//!
//! [`stream`] opens the request through a [`ChatTransport`], feeds every delta
//! to a [`StreamHandler`] and resolves to a [`TurnOutcome`]. The wait is raced
//! against the turn's cancellation token and a hard deadline; dropping the
//! chunk stream on cancellation aborts the underlying request.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::providers::ProviderKind;

use super::builder::{ImagePayload, OutboundMessage};

/// Hard limit for one streamed turn unless configured otherwise
pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed stream: {0}")]
    Malformed(String),

    #[error("{0}")]
    Upstream(String),

    #[error("no response within {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Body posted to the streaming chat endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub messages: Vec<OutboundMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImagePayload>,
    pub options: ChatOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
}

/// One incremental unit of model output
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    #[serde(default, alias = "content")]
    pub delta: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            ..Default::default()
        }
    }

    pub fn done(conversation_id: Option<&str>) -> Self {
        Self {
            done: true,
            conversation_id: conversation_id.map(Into::into),
            ..Default::default()
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, TransportError>> + Send>>;

/// Opens one logical streaming request
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, request: &ChatRequestBody) -> Result<ChunkStream, TransportError>;
}

/// Receives the turn's progress
pub trait StreamHandler {
    fn on_chunk(&mut self, delta: &str, is_done: bool, conversation_id: Option<&str>);
    fn on_complete(&mut self, conversation_id: Option<&str>);
    fn on_error(&mut self, error: &TransportError);
}

/// How a turn ended, with the last conversation id the stream reported
#[derive(Debug)]
pub enum TurnOutcome {
    Completed {
        conversation_id: Option<String>,
    },
    Errored {
        error: TransportError,
        conversation_id: Option<String>,
    },
    Cancelled {
        conversation_id: Option<String>,
    },
}

/// Drive one turn to its end.
///
/// `on_complete` and `on_error` are mutually exclusive and each fires at most
/// once; neither fires on cancellation.
pub async fn stream<T, H>(
    transport: &T,
    request: &ChatRequestBody,
    handler: &mut H,
    cancel: &CancellationToken,
    timeout: Duration,
) -> TurnOutcome
where
    T: ChatTransport + ?Sized,
    H: StreamHandler,
{
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut conversation_id = request.conversation_id.clone();

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => return TurnOutcome::Cancelled { conversation_id },
        _ = &mut deadline => return fail(handler, TransportError::Timeout(timeout), conversation_id),
        opened = transport.open(request) => opened,
    };
    let mut chunks = match opened {
        Ok(chunks) => chunks,
        Err(e) => return fail(handler, e, conversation_id),
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Turn cancelled, dropping stream");
                return TurnOutcome::Cancelled { conversation_id };
            }
            _ = &mut deadline => return fail(handler, TransportError::Timeout(timeout), conversation_id),
            next = chunks.next() => match next {
                Some(Ok(chunk)) => {
                    if let Some(id) = chunk.conversation_id.filter(|id| !id.is_empty()) {
                        conversation_id = Some(id);
                    }
                    if !chunk.delta.is_empty() || chunk.done {
                        handler.on_chunk(&chunk.delta, chunk.done, conversation_id.as_deref());
                    }
                    if chunk.done {
                        break;
                    }
                }
                Some(Err(e)) => return fail(handler, e, conversation_id),
                None => break,
            },
        }
    }

    handler.on_complete(conversation_id.as_deref());
    TurnOutcome::Completed { conversation_id }
}

fn fail<H: StreamHandler>(handler: &mut H, error: TransportError, conversation_id: Option<String>) -> TurnOutcome {
    tracing::warn!("Stream failed: {}", error);
    handler.on_error(&error);
    TurnOutcome::Errored {
        error,
        conversation_id,
    }
}

/// Cloneable handle to the in-flight turn's cancellation token
#[derive(Debug, Clone, Default)]
pub struct TurnCanceller {
    slot: Arc<Mutex<Option<CancellationToken>>>,
}

impl TurnCanceller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh token for a new turn
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(token.clone());
        }
        token
    }

    pub fn disarm(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    /// Cancel the in-flight turn, returns whether one was running
    pub fn cancel(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => match slot.as_ref() {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport replaying scripted chunks, optionally hanging afterwards
    pub(crate) struct ScriptedTransport {
        pub chunks: Vec<Result<StreamChunk, String>>,
        pub hang: bool,
        pub opened: AtomicUsize,
        pub fail_open: Option<String>,
        pub requests: Mutex<Vec<ChatRequestBody>>,
    }

    impl ScriptedTransport {
        pub fn new(chunks: Vec<StreamChunk>) -> Self {
            Self {
                chunks: chunks.into_iter().map(Ok).collect(),
                hang: false,
                opened: AtomicUsize::new(0),
                fail_open: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn hanging(chunks: Vec<StreamChunk>) -> Self {
            Self {
                hang: true,
                ..Self::new(chunks)
            }
        }

        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        pub fn last_request(&self) -> Option<ChatRequestBody> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open(&self, request: &ChatRequestBody) -> Result<ChunkStream, TransportError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if let Some(ref message) = self.fail_open {
                return Err(TransportError::Status {
                    status: 502,
                    body: message.clone(),
                });
            }
            let items: Vec<_> = self
                .chunks
                .iter()
                .cloned()
                .map(|c| c.map_err(TransportError::Upstream))
                .collect();
            let scripted = stream::iter(items);
            if self.hang {
                Ok(Box::pin(scripted.chain(stream::pending())))
            } else {
                Ok(Box::pin(scripted))
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        text: String,
        chunks: usize,
        completed: Vec<Option<String>>,
        errors: Vec<String>,
    }

    impl StreamHandler for Recorder {
        fn on_chunk(&mut self, delta: &str, _is_done: bool, _conversation_id: Option<&str>) {
            self.chunks += 1;
            self.text.push_str(delta);
        }

        fn on_complete(&mut self, conversation_id: Option<&str>) {
            self.completed.push(conversation_id.map(Into::into));
        }

        fn on_error(&mut self, error: &TransportError) {
            self.errors.push(error.to_string());
        }
    }

    pub(crate) fn request() -> ChatRequestBody {
        ChatRequestBody {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o".into(),
            conversation_id: None,
            messages: vec![],
            images: vec![],
            options: ChatOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_stream_completes_with_conversation_id() {
        let transport = ScriptedTransport::new(vec![
            StreamChunk::delta("Hel"),
            StreamChunk::delta("lo"),
            StreamChunk::done(Some("conv-9")),
            StreamChunk::delta("ignored"),
        ]);
        let mut recorder = Recorder::default();
        let outcome = stream(
            &transport,
            &request(),
            &mut recorder,
            &CancellationToken::new(),
            DEFAULT_STREAM_TIMEOUT,
        )
        .await;

        assert!(matches!(
            outcome,
            TurnOutcome::Completed { conversation_id: Some(ref id) } if id == "conv-9"
        ));
        assert_eq!(recorder.text, "Hello");
        assert_eq!(recorder.chunks, 3);
        assert_eq!(recorder.completed, vec![Some("conv-9".to_string())]);
        assert!(recorder.errors.is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_is_exclusive() {
        let mut transport = ScriptedTransport::new(vec![StreamChunk::delta("a")]);
        transport.chunks.push(Err("upstream exploded".into()));
        let mut recorder = Recorder::default();
        let outcome = stream(
            &transport,
            &request(),
            &mut recorder,
            &CancellationToken::new(),
            DEFAULT_STREAM_TIMEOUT,
        )
        .await;

        assert!(matches!(
            outcome,
            TurnOutcome::Errored {
                error: TransportError::Upstream(_),
                ..
            }
        ));
        assert_eq!(recorder.errors, vec!["upstream exploded".to_string()]);
        assert!(recorder.completed.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream() {
        let transport = ScriptedTransport::hanging(vec![StreamChunk::delta("partial")]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut recorder = Recorder::default();
        let outcome = stream(&transport, &request(), &mut recorder, &cancel, DEFAULT_STREAM_TIMEOUT).await;
        assert!(matches!(outcome, TurnOutcome::Cancelled { conversation_id: None }));
        assert_eq!(recorder.text, "partial");
        assert!(recorder.completed.is_empty());
        assert!(recorder.errors.is_empty());
    }

    #[tokio::test]
    async fn test_deadline_turns_into_error() {
        let transport = ScriptedTransport::hanging(vec![]);
        let mut recorder = Recorder::default();
        let outcome = stream(
            &transport,
            &request(),
            &mut recorder,
            &CancellationToken::new(),
            Duration::from_millis(30),
        )
        .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Errored {
                error: TransportError::Timeout(_),
                ..
            }
        ));
        assert_eq!(recorder.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_keeps_streamed_conversation_id() {
        let transport = ScriptedTransport::hanging(vec![StreamChunk {
            delta: "Par".into(),
            done: false,
            conversation_id: Some("conv-5".into()),
        }]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut recorder = Recorder::default();
        let outcome = stream(&transport, &request(), &mut recorder, &cancel, DEFAULT_STREAM_TIMEOUT).await;
        assert!(matches!(
            outcome,
            TurnOutcome::Cancelled { conversation_id: Some(ref id) } if id == "conv-5"
        ));
    }

    #[tokio::test]
    async fn test_error_keeps_streamed_conversation_id() {
        let mut transport = ScriptedTransport::new(vec![StreamChunk {
            delta: "a".into(),
            done: false,
            conversation_id: Some("conv-6".into()),
        }]);
        transport.chunks.push(Err("quota".into()));
        let mut recorder = Recorder::default();
        let outcome = stream(
            &transport,
            &request(),
            &mut recorder,
            &CancellationToken::new(),
            DEFAULT_STREAM_TIMEOUT,
        )
        .await;
        assert!(matches!(
            outcome,
            TurnOutcome::Errored { conversation_id: Some(ref id), .. } if id == "conv-6"
        ));
    }

    #[test]
    fn test_canceller_slot() {
        let canceller = TurnCanceller::new();
        assert!(!canceller.cancel());
        let token = canceller.arm();
        assert!(canceller.clone().cancel());
        assert!(token.is_cancelled());
        canceller.disarm();
        assert!(!canceller.is_armed());
    }

    #[test]
    fn test_request_body_shape() {
        let mut body = request();
        body.conversation_id = Some("c1".into());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["provider"], "openai");
        assert_eq!(json["conversationId"], "c1");
        assert!(json.get("images").is_none());
    }
}
