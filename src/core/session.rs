//! Chat session orchestration
//!
//! A `ChatSession` owns the conversation store of the active chat together
//! with the catalog it resolves models from, and drives one turn at a time:
//!
//! 1. Guard against a turn already in flight
//! 2. Resolve the provider/model pair (fails before any network call)
//! 3. Build the outbound request
//! 4. Append the user message and the model placeholder
//! 5. Stream deltas into the placeholder until completion, error or cancel
//! 6. Refresh metadata from the backend and the local mirror, out of band
//!
//! Backend, transport and mirror are injected ports so tests can swap them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::api::{ApiError, ConversationApi, ConversationPatch, NewConversation};
use crate::config::{ClientConfig, ToneRegistry};
use crate::conversation::{
    default_assistant, Assistant, Conversation, GlobalSettings, Message, ModelInfo, Role,
    StoredMessage, Suggestion,
};
use crate::providers::{resolve, ResolveError, ResolveInput, Resolved};

use super::attachments::Attachment;
use super::builder::{self, BuildInput};
use super::export::{self, ExportFormat};
use super::mirror::{LocalMirror, UNSAVED_KEY};
use super::store::{Action, ConversationStore, StoreError, TurnPhase};
use super::stream::{self, ChatOptions, ChatRequestBody, ChatTransport, StreamHandler, TransportError, TurnCanceller, TurnOutcome};
use super::views::{self, ActivitySummary, ContextUsage, ConversationStats, MessageFilter, TimelineMarker};

/// Capacity of the session event channel
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    NoModelAvailable(#[from] ResolveError),

    #[error("a reply is still being generated")]
    Busy,

    #[error("nothing to send")]
    EmptyMessage,

    #[error("there is no user message to regenerate")]
    NothingToRegenerate,

    #[error("no conversation is active")]
    NoConversation,

    #[error("unknown assistant: {0}")]
    UnknownAssistant(String),

    #[error("unknown tone: {0}")]
    UnknownTone(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Progress published to live consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    TurnStarted { provider: String, model: String },
    Delta { text: String },
    TurnCompleted { conversation_id: Option<String> },
    TurnFailed { error: String },
    TurnCancelled,
    ConversationChanged { conversation_id: Option<String> },
    LogChanged { revision: u64 },
}

/// A user turn as typed in the input box
#[derive(Debug, Clone, Default)]
pub struct SendInput {
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub reply_quote: Option<String>,
}

impl SendInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Completed,
    Errored,
    Cancelled,
}

/// How a turn ended
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnReport {
    pub status: TurnStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub conversation_id: Option<String>,
    pub reply: Option<Message>,
}

/// Injected collaborators
#[derive(Clone)]
pub struct SessionPorts {
    pub api: Arc<dyn ConversationApi>,
    pub transport: Arc<dyn ChatTransport>,
    pub mirror: Arc<dyn LocalMirror>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub stream_timeout: Duration,
    pub default_tone: String,
    pub greeting: String,
    pub suggestions: Vec<Suggestion>,
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            stream_timeout: Duration::from_secs(config.chat.stream_timeout_secs),
            default_tone: config.chat.default_tone.clone(),
            greeting: config.chat.greeting.clone(),
            suggestions: config.chat.suggestions.clone(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// Writes stream progress into the store
struct StoreSink<'a> {
    store: &'a mut ConversationStore,
    events: &'a broadcast::Sender<SessionEvent>,
}

impl StoreSink<'_> {
    fn apply(&mut self, action: Action) {
        if let Err(e) = self.store.dispatch(action) {
            tracing::warn!("Dropped stream update: {}", e);
        }
    }
}

impl StreamHandler for StoreSink<'_> {
    fn on_chunk(&mut self, delta: &str, _is_done: bool, _conversation_id: Option<&str>) {
        if delta.is_empty() {
            return;
        }
        self.apply(Action::StreamDelta(delta.to_string()));
        let _ = self.events.send(SessionEvent::Delta {
            text: delta.to_string(),
        });
    }

    fn on_complete(&mut self, conversation_id: Option<&str>) {
        self.apply(Action::CompleteTurn {
            conversation_id: conversation_id.map(Into::into),
            finished_at: Utc::now(),
        });
    }

    fn on_error(&mut self, error: &TransportError) {
        self.apply(Action::FailTurn {
            error: error.to_string(),
        });
    }
}

pub struct ChatSession {
    store: ConversationStore,
    conversation: Option<Conversation>,
    assistant: Option<Assistant>,
    models: Vec<ModelInfo>,
    assistants: Vec<Assistant>,
    settings: GlobalSettings,
    conversations: Vec<Conversation>,
    tones: ToneRegistry,
    tone_id: String,
    /// Inputs of the user turns sent in this session, keyed by message id
    turn_inputs: HashMap<Uuid, SendInput>,
    ports: SessionPorts,
    options: SessionOptions,
    canceller: TurnCanceller,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    pub fn new(ports: SessionPorts, tones: ToneRegistry, options: SessionOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let tone_id = if tones.get(&options.default_tone).is_some() {
            options.default_tone.clone()
        } else {
            crate::config::DEFAULT_TONE.to_string()
        };
        Self {
            store: ConversationStore::new(),
            conversation: None,
            assistant: None,
            models: Vec::new(),
            assistants: Vec::new(),
            settings: GlobalSettings::default(),
            conversations: Vec::new(),
            tones,
            tone_id,
            turn_inputs: HashMap::new(),
            ports,
            options,
            canceller: TurnCanceller::new(),
            events,
        }
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn phase(&self) -> &TurnPhase {
        self.store.phase()
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.id.as_str())
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn assistant(&self) -> Option<&Assistant> {
        self.assistant.as_ref()
    }

    pub fn assistants(&self) -> &[Assistant] {
        &self.assistants
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn tone_id(&self) -> &str {
        &self.tone_id
    }

    pub fn tones(&self) -> &ToneRegistry {
        &self.tones
    }

    /// Handle that cancels the in-flight turn without access to the session
    pub fn canceller(&self) -> TurnCanceller {
        self.canceller.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Sender side of the event channel, for subscribing without the session
    pub fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn mirror_key(&self) -> String {
        self.conversation_id().unwrap_or(UNSAVED_KEY).to_string()
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.store.is_generating() {
            Err(SessionError::Busy)
        } else {
            Ok(())
        }
    }

    /// Reload models, assistants and settings from the backend
    pub async fn refresh_catalog(&mut self) -> Result<(), SessionError> {
        self.models = self.ports.api.list_models().await?;
        self.assistants = self.ports.api.list_assistants().await?;
        self.settings = self.ports.api.get_settings().await?;
        if self.assistant.is_none() {
            self.assistant = default_assistant(&self.assistants).cloned();
        }
        tracing::debug!(
            models = self.models.len(),
            assistants = self.assistants.len(),
            "Catalog refreshed"
        );
        Ok(())
    }

    pub async fn refresh_conversations(&mut self) -> Result<(), SessionError> {
        self.conversations = self.ports.api.list_conversations().await?;
        Ok(())
    }

    /// The pair the next turn would use
    pub fn resolve(&self) -> Result<Resolved, ResolveError> {
        resolve(ResolveInput {
            conversation_provider: self.conversation.as_ref().and_then(|c| c.provider.as_ref()),
            conversation_model: self.conversation.as_ref().and_then(|c| c.model.as_deref()),
            assistant: self.assistant.as_ref(),
            settings: &self.settings,
            known_models: &self.models,
        })
    }

    pub fn set_tone(&mut self, tone_id: &str) -> Result<(), SessionError> {
        if self.tones.get(tone_id).is_none() {
            return Err(SessionError::UnknownTone(tone_id.to_string()));
        }
        self.tone_id = tone_id.to_string();
        Ok(())
    }

    /// Start a fresh chat with an assistant (the default one when `None`)
    pub async fn new_chat(&mut self, assistant_id: Option<&str>) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let assistant = match assistant_id {
            Some(id) => Some(
                self.assistants
                    .iter()
                    .find(|a| a.id == id)
                    .cloned()
                    .ok_or_else(|| SessionError::UnknownAssistant(id.to_string()))?,
            ),
            None => default_assistant(&self.assistants).cloned(),
        };

        self.mirror_current().await;
        self.assistant = assistant;
        self.reset_log()?;
        tracing::info!(
            assistant = self.assistant.as_ref().map(|a| a.name.as_str()).unwrap_or("-"),
            "Started new chat"
        );
        Ok(())
    }

    fn reset_log(&mut self) -> Result<(), SessionError> {
        self.conversation = None;
        self.turn_inputs.clear();
        let name = self
            .assistant
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or("AI 助手");
        let greeting = Message::model(self.options.greeting.replace("{assistant}", name))
            .with_suggestions(self.options.suggestions.clone());
        self.store.dispatch(Action::Load(vec![greeting]))?;
        self.emit(SessionEvent::ConversationChanged {
            conversation_id: None,
        });
        Ok(())
    }

    /// Fetch a conversation and make it the active log
    pub async fn select_conversation(&mut self, id: &str) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.mirror_current().await;

        let (conversation, messages) = match self.ports.api.get_conversation(id).await {
            Ok(detail) => (
                detail.conversation,
                detail.messages.into_iter().map(Message::from).collect::<Vec<_>>(),
            ),
            Err(e) => {
                let cached = self.ports.mirror.load_log(id).await.ok().flatten();
                let known = self.conversations.iter().find(|c| c.id == id).cloned();
                match (cached, known) {
                    (Some(messages), Some(conversation)) => {
                        tracing::warn!(conversation = id, "Backend unavailable, using mirrored log: {}", e);
                        (conversation, messages)
                    }
                    _ => return Err(e.into()),
                }
            }
        };

        if let Some(assistant_id) = conversation.assistant_id.as_deref() {
            if let Some(assistant) = self.assistants.iter().find(|a| a.id == assistant_id) {
                self.assistant = Some(assistant.clone());
            }
        }
        self.store.dispatch(Action::Load(messages))?;
        self.turn_inputs.clear();
        tracing::info!(conversation = id, messages = self.store.len(), "Conversation selected");
        self.conversation = Some(conversation);
        self.emit(SessionEvent::ConversationChanged {
            conversation_id: Some(id.to_string()),
        });
        Ok(())
    }

    pub async fn delete_conversation(&mut self, id: &str) -> Result<(), SessionError> {
        let is_active = self.conversation_id() == Some(id);
        if is_active {
            self.ensure_idle()?;
        }
        self.ports.api.delete_conversation(id).await?;
        if let Err(e) = self.ports.mirror.remove_log(id).await {
            tracing::warn!(conversation = id, "Failed to drop mirrored log: {}", e);
        }
        self.conversations.retain(|c| c.id != id);
        if is_active {
            self.reset_log()?;
        }
        tracing::info!(conversation = id, "Conversation deleted");
        Ok(())
    }

    /// Rename the active conversation or switch its model.
    ///
    /// A model from the catalog brings its provider along unless the patch
    /// names one.
    pub async fn update_conversation(&mut self, mut patch: ConversationPatch) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let id = self
            .conversation_id()
            .ok_or(SessionError::NoConversation)?
            .to_string();
        if patch.provider.is_none() {
            if let Some(model) = patch.model.as_deref() {
                patch.provider = self
                    .models
                    .iter()
                    .find(|m| m.model_id == model)
                    .map(|m| m.provider.clone());
            }
        }

        let updated = self.ports.api.update_conversation(&id, &patch).await?;
        if let Some(entry) = self.conversations.iter_mut().find(|c| c.id == id) {
            *entry = updated.clone();
        }
        tracing::info!(conversation = %id, model = ?updated.model, "Conversation updated");
        self.conversation = Some(updated);
        self.emit(SessionEvent::ConversationChanged {
            conversation_id: Some(id),
        });
        Ok(())
    }

    /// Send a user turn and stream the reply
    pub async fn send(&mut self, input: SendInput) -> Result<TurnReport, SessionError> {
        self.start_turn(input, Vec::new()).await
    }

    /// Drop the last reply and replay the last user turn.
    ///
    /// Turns sent in this session are replayed with their original quote and
    /// attachments; turns loaded from history replay their text.
    pub async fn regenerate(&mut self) -> Result<TurnReport, SessionError> {
        self.ensure_idle()?;
        let index = self
            .store
            .last_user_index()
            .ok_or(SessionError::NothingToRegenerate)?;
        let messages = self.store.messages();
        let user = &messages[index];
        let input = self
            .turn_inputs
            .get(&user.id)
            .cloned()
            .unwrap_or_else(|| SendInput::text(user.text.clone()));
        let carry_versions = messages
            .get(index + 1)
            .filter(|m| m.role == Role::Model)
            .map(|reply| {
                let mut versions = reply.versions.clone();
                if !reply.text.is_empty() {
                    versions.push(reply.text.clone());
                }
                versions
            })
            .unwrap_or_default();

        self.check_turn(&input)?;
        self.store.dispatch(Action::Truncate(index))?;
        self.start_turn(input, carry_versions).await
    }

    /// Rewrite history from `index` and replay `text` as a new turn
    pub async fn edit_and_resend(&mut self, index: usize, text: &str) -> Result<TurnReport, SessionError> {
        let input = SendInput::text(text);
        self.check_turn(&input)?;
        self.store.dispatch(Action::Truncate(index))?;
        self.start_turn(input, Vec::new()).await
    }

    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    /// Everything that can reject a turn, checked before the log changes
    fn check_turn(&self, input: &SendInput) -> Result<Resolved, SessionError> {
        self.ensure_idle()?;
        if input.text.trim().is_empty() && !input.attachments.iter().any(Attachment::is_usable) {
            return Err(SessionError::EmptyMessage);
        }
        Ok(self.resolve()?)
    }

    async fn start_turn(&mut self, input: SendInput, carry_versions: Vec<String>) -> Result<TurnReport, SessionError> {
        let resolved = self.check_turn(&input)?;

        let built = builder::build(BuildInput {
            user_text: &input.text,
            attachments: &input.attachments,
            reply_quote: input.reply_quote.as_deref(),
            tone_id: &self.tone_id,
            tones: &self.tones,
            system_prompt: self.assistant.as_ref().map(|a| a.system_prompt.as_str()),
            history: self.store.messages(),
        });

        let request = ChatRequestBody {
            provider: resolved.provider.clone(),
            model: resolved.model.clone(),
            conversation_id: self.conversation_id().map(Into::into),
            messages: built.outbound,
            images: built.images,
            options: ChatOptions {
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
                assistant_id: self.assistant.as_ref().map(|a| a.id.clone()),
            },
        };

        let mut user = Message::user(built.display_text);
        user.image_count = request.images.len();
        let user_id = user.id;
        self.store.dispatch(Action::BeginTurn {
            user,
            started_at: Utc::now(),
            carry_versions,
        })?;
        self.turn_inputs.insert(user_id, input);
        tracing::info!(provider = %resolved.provider, model = %resolved.model, "Turn started");
        self.emit(SessionEvent::TurnStarted {
            provider: resolved.provider.to_string(),
            model: resolved.model.clone(),
        });

        let transport = Arc::clone(&self.ports.transport);
        let token = self.canceller.arm();
        let outcome = {
            let mut sink = StoreSink {
                store: &mut self.store,
                events: &self.events,
            };
            stream::stream(
                transport.as_ref(),
                &request,
                &mut sink,
                &token,
                self.options.stream_timeout,
            )
            .await
        };
        self.canceller.disarm();

        let report = match outcome {
            TurnOutcome::Completed { conversation_id } => {
                tracing::info!(conversation = ?conversation_id, "Turn completed");
                self.emit(SessionEvent::TurnCompleted {
                    conversation_id: conversation_id.clone(),
                });
                self.after_turn(conversation_id.as_deref(), &resolved).await;
                TurnReport {
                    status: TurnStatus::Completed,
                    error: None,
                    conversation_id,
                    reply: None,
                }
            }
            TurnOutcome::Errored { error, conversation_id } => {
                self.emit(SessionEvent::TurnFailed {
                    error: error.to_string(),
                });
                self.after_turn(conversation_id.as_deref(), &resolved).await;
                TurnReport {
                    status: TurnStatus::Errored,
                    error: Some(error.to_string()),
                    conversation_id: self.conversation_id().map(Into::into),
                    reply: None,
                }
            }
            TurnOutcome::Cancelled { conversation_id } => {
                self.store.dispatch(Action::CancelTurn)?;
                tracing::info!("Turn cancelled");
                self.emit(SessionEvent::TurnCancelled);
                self.after_turn(conversation_id.as_deref(), &resolved).await;
                TurnReport {
                    status: TurnStatus::Cancelled,
                    error: None,
                    conversation_id: self.conversation_id().map(Into::into),
                    reply: None,
                }
            }
        };

        self.mirror_current().await;
        self.emit(SessionEvent::LogChanged {
            revision: self.store.revision(),
        });
        Ok(TurnReport {
            reply: self.store.trailing().cloned(),
            ..report
        })
    }

    /// Pick up the backend's view of the conversation after a turn, however
    /// it ended. The backend may create the conversation before the first
    /// delta, so a cancelled or failed first turn still adopts its id.
    /// Failures are logged and leave the turn in place.
    async fn after_turn(&mut self, conversation_id: Option<&str>, resolved: &Resolved) {
        let Some(id) = conversation_id else {
            return;
        };

        match self.ports.api.get_conversation(id).await {
            Ok(detail) => self.conversation = Some(detail.conversation),
            Err(e) => {
                tracing::warn!(conversation = id, "Failed to reload conversation after turn: {}", e);
                if self.conversation_id() != Some(id) {
                    let now = Utc::now();
                    self.conversation = Some(Conversation {
                        id: id.to_string(),
                        title: String::new(),
                        provider: Some(resolved.provider.clone()),
                        model: Some(resolved.model.clone()),
                        assistant_id: self.assistant.as_ref().map(|a| a.id.clone()),
                        created_at: now,
                        updated_at: now,
                    });
                }
            }
        }

        if let Err(e) = self.refresh_conversations().await {
            tracing::warn!("Failed to refresh conversation list: {}", e);
        }
        if let Err(e) = self.ports.mirror.remove_log(UNSAVED_KEY).await {
            tracing::debug!("Failed to drop unsaved log: {}", e);
        }
    }

    async fn mirror_current(&self) {
        if self.store.is_empty() {
            return;
        }
        let key = self.mirror_key();
        if let Err(e) = self.ports.mirror.save_log(&key, self.store.messages()).await {
            tracing::warn!(key = %key, "Failed to mirror conversation log: {}", e);
        }
    }

    /// Apply a local store action
    pub fn dispatch(&mut self, action: Action) -> Result<(), SessionError> {
        self.store.dispatch(action)?;
        self.emit(SessionEvent::LogChanged {
            revision: self.store.revision(),
        });
        Ok(())
    }

    /// Continue in a new conversation seeded with `[0..=index]`.
    ///
    /// The fork is saved to the backend when possible; otherwise it stays a
    /// local, unsaved chat. Returns the new conversation id if one was issued.
    pub async fn fork(&mut self, index: usize) -> Result<Option<String>, SessionError> {
        self.ensure_idle()?;
        let forked = self.store.fork(index)?;
        self.mirror_current().await;

        let base_title = self
            .conversation
            .as_ref()
            .map(|c| c.title.as_str())
            .filter(|t| !t.is_empty())
            .unwrap_or("新对话");
        let new = NewConversation {
            title: format!("{base_title} (分支)"),
            provider: self.conversation.as_ref().and_then(|c| c.provider.clone()),
            model: self.conversation.as_ref().and_then(|c| c.model.clone()),
            assistant_id: self.assistant.as_ref().map(|a| a.id.clone()),
            messages: forked
                .messages()
                .iter()
                .filter(|m| !m.is_greeting())
                .map(StoredMessage::from)
                .collect(),
        };

        self.conversation = match self.ports.api.create_conversation(&new).await {
            Ok(conversation) => Some(conversation),
            Err(e) => {
                tracing::warn!("Fork kept local, backend save failed: {}", e);
                None
            }
        };
        let turn_inputs = self
            .store
            .messages()
            .iter()
            .zip(forked.messages())
            .filter_map(|(old, new)| self.turn_inputs.get(&old.id).map(|input| (new.id, input.clone())))
            .collect();
        self.turn_inputs = turn_inputs;
        self.store = forked;
        let id = self.conversation_id().map(String::from);
        tracing::info!(conversation = ?id, messages = self.store.len(), "Forked conversation");
        self.emit(SessionEvent::ConversationChanged {
            conversation_id: id.clone(),
        });
        Ok(id)
    }

    /// Store the input box draft for the active conversation
    pub async fn save_draft(&self, text: &str) {
        let key = self.mirror_key();
        let result = if text.is_empty() {
            self.ports.mirror.clear_draft(&key).await
        } else {
            self.ports.mirror.save_draft(&key, text).await
        };
        if let Err(e) = result {
            tracing::warn!(key = %key, "Failed to save draft: {}", e);
        }
    }

    pub async fn load_draft(&self) -> Option<String> {
        self.ports
            .mirror
            .load_draft(&self.mirror_key())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to load draft: {}", e);
                None
            })
    }

    pub fn draft_key(&self) -> String {
        self.mirror_key()
    }

    pub fn stats(&self) -> ConversationStats {
        views::conversation_stats(self.store.messages())
    }

    pub fn context_usage(&self) -> ContextUsage {
        let model = self.resolve().map(|r| r.model).unwrap_or_default();
        let window = self
            .models
            .iter()
            .find(|m| m.model_id == model)
            .and_then(|m| m.context_window);
        views::context_usage(self.store.messages(), &model, window)
    }

    pub fn timeline(&self) -> Vec<TimelineMarker> {
        views::timeline_markers(self.store.messages())
    }

    pub fn search(&self, filter: &MessageFilter) -> Vec<(usize, &Message)> {
        views::filter_messages(self.store.messages(), filter)
    }

    pub fn pinned(&self) -> Vec<(usize, &Message)> {
        views::pinned_messages(self.store.messages())
    }

    /// Known conversations whose title matches `query`
    pub fn find_conversations(&self, query: &str) -> Vec<&Conversation> {
        views::search_conversations(&self.conversations, query)
    }

    pub fn activity(&self, today: NaiveDate, days: u32) -> ActivitySummary {
        views::activity_summary(&self.conversations, today, days)
    }

    pub fn export(&self, format: ExportFormat) -> String {
        let title = self
            .conversation
            .as_ref()
            .map(|c| c.title.as_str())
            .filter(|t| !t.is_empty())
            .unwrap_or("新对话");
        export::export(title, self.store.messages(), format)
    }
}
