//! Local HTTP surface for the dashboard
//!
//! Session access is serialised behind one mutex, so a request made while a
//! turn streams waits for it to finish. Cancellation and the event stream do
//! not take the lock.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{delete, get, patch, post},
    Router,
};
use base64::Engine;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use uuid::Uuid;

use crate::api::ConversationPatch;
use crate::conversation::{Assistant, Conversation, Message, Role};
use crate::core::attachments::{self, Attachment};
use crate::core::export::ExportFormat;
use crate::core::mirror::DraftState;
use crate::core::session::{ChatSession, SendInput, SessionError, SessionEvent, TurnReport};
use crate::core::store::{Action, Flag, Snapshot, StoreError, TurnPhase};
use crate::core::stream::TurnCanceller;
use crate::core::views::{ActivitySummary, ContextUsage, ConversationStats, MessageFilter, TimelineMarker};

/// Days covered by the activity series unless the query says otherwise
const DEFAULT_ACTIVITY_DAYS: u32 = 30;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Mutex<ChatSession>>,
    pub canceller: TurnCanceller,
    pub events: broadcast::Sender<SessionEvent>,
    pub drafts: Arc<watch::Sender<DraftState>>,
}

impl AppState {
    pub fn new(session: ChatSession, drafts: watch::Sender<DraftState>) -> Self {
        Self {
            canceller: session.canceller(),
            events: session.event_sender(),
            session: Arc::new(Mutex::new(session)),
            drafts: Arc::new(drafts),
        }
    }
}

/// Error body returned by every route
pub struct RouteError {
    status: StatusCode,
    message: String,
}

impl RouteError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<SessionError> for RouteError {
    fn from(error: SessionError) -> Self {
        let status = match &error {
            SessionError::Busy | SessionError::Store(StoreError::Busy) => StatusCode::CONFLICT,
            SessionError::NoModelAvailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SessionError::UnknownAssistant(_) | SessionError::UnknownTone(_) | SessionError::NoConversation => {
                StatusCode::NOT_FOUND
            }
            SessionError::Store(StoreError::UnknownSnapshot(_)) => StatusCode::NOT_FOUND,
            SessionError::Api(_) => StatusCode::BAD_GATEWAY,
            SessionError::EmptyMessage | SessionError::NothingToRegenerate | SessionError::Store(_) => {
                StatusCode::BAD_REQUEST
            }
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type RouteResult<T> = Result<Json<T>, RouteError>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Everything the chat pane renders
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    conversation: Option<Conversation>,
    assistant: Option<Assistant>,
    tone: String,
    phase: TurnPhase,
    revision: u64,
    messages: Vec<Message>,
    snapshots: Vec<Snapshot>,
}

impl SessionView {
    fn of(session: &ChatSession) -> Self {
        Self {
            conversation: session.conversation().cloned(),
            assistant: session.assistant().cloned(),
            tone: session.tone_id().to_string(),
            phase: session.phase().clone(),
            revision: session.store().revision(),
            messages: session.messages().to_vec(),
            snapshots: session.store().snapshots().to_vec(),
        }
    }
}

async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    let session = state.session.lock().await;
    Json(SessionView::of(&session))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    q: Option<String>,
    #[serde(default)]
    bookmarked: bool,
    role: Option<Role>,
}

#[derive(Debug, Serialize)]
struct IndexedMessage {
    index: usize,
    message: Message,
}

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> Json<Vec<IndexedMessage>> {
    let filter = MessageFilter {
        query: query.q.filter(|q| !q.trim().is_empty()),
        bookmarked_only: query.bookmarked,
        role: query.role,
    };
    let session = state.session.lock().await;
    let found = session
        .search(&filter)
        .into_iter()
        .map(|(index, message)| IndexedMessage {
            index,
            message: message.clone(),
        })
        .collect();
    Json(found)
}

async fn pinned(State(state): State<AppState>) -> Json<Vec<IndexedMessage>> {
    let session = state.session.lock().await;
    let pinned = session
        .pinned()
        .into_iter()
        .map(|(index, message)| IndexedMessage {
            index,
            message: message.clone(),
        })
        .collect();
    Json(pinned)
}

/// Rename the active conversation or switch its model
async fn update_conversation(
    State(state): State<AppState>,
    Json(patch): Json<ConversationPatch>,
) -> RouteResult<SessionView> {
    if patch.title.is_none() && patch.model.is_none() && patch.provider.is_none() {
        return Err(RouteError::bad_request("nothing to update"));
    }
    let mut session = state.session.lock().await;
    session.update_conversation(patch).await?;
    Ok(Json(SessionView::of(&session)))
}

/// A file uploaded with a turn, content in base64
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachments: Vec<UploadedFile>,
    #[serde(default)]
    reply_quote: Option<String>,
    #[serde(default)]
    tone: Option<String>,
}

fn decode_uploads(files: Vec<UploadedFile>) -> Result<Vec<Attachment>, RouteError> {
    files
        .into_iter()
        .map(|file| {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(file.data.as_bytes())
                .map_err(|e| RouteError::bad_request(format!("{}: invalid base64: {}", file.name, e)))?;
            Ok(attachments::process_bytes(&file.name, file.mime_type.as_deref(), &bytes))
        })
        .collect()
}

async fn send(State(state): State<AppState>, Json(request): Json<SendRequest>) -> RouteResult<TurnReport> {
    let attachments = decode_uploads(request.attachments)?;
    let mut session = state.session.lock().await;
    if let Some(tone) = request.tone.as_deref() {
        session.set_tone(tone)?;
    }
    let report = session
        .send(SendInput {
            text: request.text,
            attachments,
            reply_quote: request.reply_quote,
        })
        .await?;
    Ok(Json(report))
}

async fn cancel(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cancelled = state.canceller.cancel();
    Json(serde_json::json!({ "cancelled": cancelled }))
}

async fn regenerate(State(state): State<AppState>) -> RouteResult<TurnReport> {
    let mut session = state.session.lock().await;
    Ok(Json(session.regenerate().await?))
}

#[derive(Debug, Deserialize)]
struct EditRequest {
    text: String,
}

async fn edit(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(request): Json<EditRequest>,
) -> RouteResult<TurnReport> {
    let mut session = state.session.lock().await;
    Ok(Json(session.edit_and_resend(index, &request.text).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewChatRequest {
    #[serde(default)]
    assistant_id: Option<String>,
}

async fn new_chat(
    State(state): State<AppState>,
    request: Option<Json<NewChatRequest>>,
) -> RouteResult<SessionView> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let mut session = state.session.lock().await;
    session.new_chat(request.assistant_id.as_deref()).await?;
    Ok(Json(SessionView::of(&session)))
}

async fn select(State(state): State<AppState>, Path(id): Path<String>) -> RouteResult<SessionView> {
    let mut session = state.session.lock().await;
    session.select_conversation(&id).await?;
    Ok(Json(SessionView::of(&session)))
}

/// Local edits accepted by `POST /session/action`
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ActionRequest {
    ToggleFlag { index: usize, flag: Flag },
    SetRating { index: usize, rating: Option<u8> },
    ToggleReaction { index: usize, emoji: String },
    SetTranslation { index: usize, language: String, text: String },
    SelectVersion { index: usize, version: usize },
    Delete { index: usize },
    Truncate { index: usize },
    Merge { indices: Vec<usize> },
    SaveSnapshot { name: String },
    RestoreSnapshot { id: Uuid },
    DeleteSnapshot { id: Uuid },
}

impl From<ActionRequest> for Action {
    fn from(request: ActionRequest) -> Self {
        match request {
            ActionRequest::ToggleFlag { index, flag } => Action::ToggleFlag { index, flag },
            ActionRequest::SetRating { index, rating } => Action::SetRating { index, rating },
            ActionRequest::ToggleReaction { index, emoji } => Action::ToggleReaction { index, emoji },
            ActionRequest::SetTranslation { index, language, text } => Action::SetTranslation {
                index,
                language,
                text,
            },
            ActionRequest::SelectVersion { index, version } => Action::SelectVersion { index, version },
            ActionRequest::Delete { index } => Action::Delete(index),
            ActionRequest::Truncate { index } => Action::Truncate(index),
            ActionRequest::Merge { indices } => Action::Merge(indices),
            ActionRequest::SaveSnapshot { name } => Action::SaveSnapshot { name },
            ActionRequest::RestoreSnapshot { id } => Action::RestoreSnapshot(id),
            ActionRequest::DeleteSnapshot { id } => Action::DeleteSnapshot(id),
        }
    }
}

async fn apply_action(
    State(state): State<AppState>,
    Json(request): Json<ActionRequest>,
) -> RouteResult<SessionView> {
    let mut session = state.session.lock().await;
    session.dispatch(request.into())?;
    Ok(Json(SessionView::of(&session)))
}

async fn fork(State(state): State<AppState>, Path(index): Path<usize>) -> RouteResult<serde_json::Value> {
    let mut session = state.session.lock().await;
    let conversation_id = session.fork(index).await?;
    Ok(Json(serde_json::json!({ "conversationId": conversation_id })))
}

async fn stats(State(state): State<AppState>) -> Json<ConversationStats> {
    Json(state.session.lock().await.stats())
}

async fn context(State(state): State<AppState>) -> Json<ContextUsage> {
    Json(state.session.lock().await.context_usage())
}

async fn timeline(State(state): State<AppState>) -> Json<Vec<TimelineMarker>> {
    Json(state.session.lock().await.timeline())
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

async fn export(State(state): State<AppState>, Query(query): Query<ExportQuery>) -> Result<Response, RouteError> {
    let format = match query.format.as_deref() {
        Some(raw) => raw.parse::<ExportFormat>().map_err(RouteError::bad_request)?,
        None => ExportFormat::Markdown,
    };
    let body = state.session.lock().await.export(format);
    let disposition = format!("attachment; filename=\"conversation.{}\"", format.extension());
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Serialize, Deserialize)]
struct DraftBody {
    text: String,
}

async fn get_draft(State(state): State<AppState>) -> Json<DraftBody> {
    let text = state.session.lock().await.load_draft().await.unwrap_or_default();
    Json(DraftBody { text })
}

/// Hand the draft to the autosave task
async fn put_draft(State(state): State<AppState>, Json(body): Json<DraftBody>) -> StatusCode {
    let key = state.session.lock().await.draft_key();
    state.drafts.send_replace((key, body.text));
    StatusCode::NO_CONTENT
}

async fn events(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut receiver = state.events.subscribe();
    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(event) => match Event::default().json_data(&event) {
                    Ok(sse) => yield Ok(sse),
                    Err(e) => tracing::warn!("Failed to encode session event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct ConversationQuery {
    q: Option<String>,
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ConversationQuery>,
) -> RouteResult<Vec<Conversation>> {
    let mut session = state.session.lock().await;
    session.refresh_conversations().await?;
    let found = session
        .find_conversations(query.q.as_deref().unwrap_or_default())
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(found))
}

#[derive(Debug, Deserialize)]
struct ActivityQuery {
    days: Option<u32>,
}

async fn activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> RouteResult<ActivitySummary> {
    let days = query.days.unwrap_or(DEFAULT_ACTIVITY_DAYS).clamp(1, 366);
    let mut session = state.session.lock().await;
    session.refresh_conversations().await?;
    Ok(Json(session.activity(chrono::Utc::now().date_naive(), days)))
}

async fn delete_conversation(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, RouteError> {
    state.session.lock().await.delete_conversation(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/session", get(get_session))
        .route("/session/messages", get(list_messages))
        .route("/session/pinned", get(pinned))
        .route("/session/conversation", patch(update_conversation))
        .route("/session/send", post(send))
        .route("/session/cancel", post(cancel))
        .route("/session/regenerate", post(regenerate))
        .route("/session/edit/:index", post(edit))
        .route("/session/new", post(new_chat))
        .route("/session/select/:id", post(select))
        .route("/session/action", post(apply_action))
        .route("/session/fork/:index", post(fork))
        .route("/session/stats", get(stats))
        .route("/session/context", get(context))
        .route("/session/timeline", get(timeline))
        .route("/session/export", get(export))
        .route("/session/draft", get(get_draft).put(put_draft))
        .route("/session/events", get(events))
        .route("/conversations", get(list_conversations))
        .route("/conversations/activity", get(activity))
        .route("/conversations/:id", delete(delete_conversation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToneRegistry;
    use crate::core::mirror::{MemoryMirror, UNSAVED_KEY};
    use crate::core::session::tests::{api_with_catalog, reply_chunks};
    use crate::core::session::{SessionOptions, SessionPorts};
    use crate::core::stream::tests::ScriptedTransport;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> (Router, AppState) {
        let ports = SessionPorts {
            api: Arc::new(api_with_catalog()),
            transport: Arc::new(ScriptedTransport::new(reply_chunks("Sure thing"))),
            mirror: Arc::new(MemoryMirror::new()),
        };
        let mut session = ChatSession::new(ports, ToneRegistry::builtin(), SessionOptions::default());
        tokio_test::assert_ok!(session.refresh_catalog().await);
        tokio_test::assert_ok!(session.new_chat(None).await);
        let (drafts, _) = watch::channel((UNSAVED_KEY.to_string(), String::new()));
        let state = AppState::new(session, drafts);
        (router().with_state(state.clone()), state)
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app().await;
        let (status, json) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_send_then_bookmark() {
        let (app, _) = app().await;
        let (status, report) = call(&app, post_json("/session/send", serde_json::json!({ "text": "hi" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["status"], "completed");
        assert_eq!(report["reply"]["text"], "Sure thing");

        let (status, view) = call(
            &app,
            post_json(
                "/session/action",
                serde_json::json!({ "type": "toggleFlag", "index": 2, "flag": "bookmark" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["messages"][2]["isBookmarked"], true);
        assert_eq!(view["conversation"]["id"], "conv-1");

        let (_, found) = call(&app, get("/session/messages?bookmarked=true")).await;
        assert_eq!(found.as_array().unwrap().len(), 1);
        assert_eq!(found[0]["index"], 2);
    }

    #[tokio::test]
    async fn test_empty_send_is_rejected() {
        let (app, _) = app().await;
        let (status, json) = call(&app, post_json("/session/send", serde_json::json!({ "text": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "nothing to send");

        let (status, _) = call(
            &app,
            post_json(
                "/session/send",
                serde_json::json!({ "text": "see file", "attachments": [{ "name": "a.txt", "data": "%%%" }] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_out_of_range_action() {
        let (app, _) = app().await;
        let (status, json) = call(
            &app,
            post_json("/session/action", serde_json::json!({ "type": "delete", "index": 9 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("out of range"));
    }

    #[tokio::test]
    async fn test_export_sets_content_type() {
        let (app, _) = app().await;
        let response = app.clone().oneshot(get("/session/export?format=txt")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );

        let (status, _) = call(&app, get("/session/export?format=pdf")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_without_turn() {
        let (app, _) = app().await;
        let (status, json) = call(&app, post_json("/session/cancel", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cancelled"], false);
    }

    fn patch_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("PATCH")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_message_role_filter_and_pinned() {
        let (app, _) = app().await;
        call(&app, post_json("/session/send", serde_json::json!({ "text": "hi" }))).await;

        let (_, users) = call(&app, get("/session/messages?role=user")).await;
        assert_eq!(users.as_array().unwrap().len(), 1);
        assert_eq!(users[0]["index"], 1);
        let (_, models) = call(&app, get("/session/messages?role=assistant")).await;
        assert_eq!(models.as_array().unwrap().len(), 2);

        call(
            &app,
            post_json(
                "/session/action",
                serde_json::json!({ "type": "toggleFlag", "index": 2, "flag": "pin" }),
            ),
        )
        .await;
        let (status, pinned) = call(&app, get("/session/pinned")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pinned.as_array().unwrap().len(), 1);
        assert_eq!(pinned[0]["message"]["text"], "Sure thing");
    }

    #[tokio::test]
    async fn test_conversation_search_and_activity() {
        let (app, _) = app().await;
        let (_, all) = call(&app, get("/conversations")).await;
        assert_eq!(all.as_array().unwrap().len(), 1);
        let (_, found) = call(&app, get("/conversations?q=RUST")).await;
        assert_eq!(found[0]["id"], "conv-1");
        let (_, none) = call(&app, get("/conversations?q=python")).await;
        assert!(none.as_array().unwrap().is_empty());

        let (status, activity) = call(&app, get("/conversations/activity?days=7")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(activity["daily"].as_array().unwrap().len(), 7);
        assert_eq!(activity["heatmap"].as_array().unwrap().len(), 7);
        assert_eq!(activity["daily"][6]["count"], 1);
    }

    #[tokio::test]
    async fn test_patch_conversation() {
        let (app, _) = app().await;
        let (status, _) = call(&app, patch_json("/session/conversation", serde_json::json!({ "title": "x" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(&app, post_json("/session/select/conv-1", serde_json::json!({}))).await;
        let (status, view) = call(
            &app,
            patch_json("/session/conversation", serde_json::json!({ "title": "Ownership notes" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["conversation"]["title"], "Ownership notes");

        let (status, _) = call(&app, patch_json("/session/conversation", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_put_draft_publishes_to_autosave() {
        let (app, state) = app().await;
        let mut drafts = state.drafts.subscribe();
        let request = Request::builder()
            .method("PUT")
            .uri("/session/draft")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"text":"half a note"}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(drafts.has_changed().unwrap());
        assert_eq!(drafts.borrow_and_update().1, "half a note");
    }
}
