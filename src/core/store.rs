//! Conversation state store
//!
//! The single ordered message log of the active conversation, mutated only
//! through [`Action`]s. The turn lifecycle is a tagged [`TurnPhase`]:
//!
//! ```text
//! Idle -> Sending -> Streaming -> Completed | Errored | Cancelled
//! ```
//!
//! While a turn is generating the trailing message is the model placeholder
//! receiving deltas, so actions that would move or remove it are rejected.
//! The store is synchronous and makes no durability promise; persistence
//! happens out of band in the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::conversation::{Message, Role};

use super::views::token_estimate;

/// Text shown in place of a reply that failed
pub const TURN_ERROR_PREFIX: &str = "抱歉，生成回复时出错：";

/// Separator between merged message texts
pub const MERGE_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("message index {index} out of range (log has {len} messages)")]
    OutOfRange { index: usize, len: usize },

    #[error("a reply is still being generated")]
    Busy,

    #[error("no turn is being generated")]
    NotGenerating,

    #[error("rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),

    #[error("merging needs at least two distinct messages")]
    MergeNeedsTwo,

    #[error("message {index} has no version {version}")]
    UnknownVersion { index: usize, version: usize },

    #[error("unknown snapshot {0}")]
    UnknownSnapshot(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Bookmark,
    Pin,
}

/// Lifecycle of the current turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum TurnPhase {
    Idle,
    Sending {
        started_at: DateTime<Utc>,
    },
    Streaming {
        started_at: DateTime<Utc>,
        generated_tokens: u64,
    },
    Completed {
        conversation_id: Option<String>,
        response_time_ms: u64,
    },
    Errored {
        error: String,
    },
    Cancelled,
}

impl TurnPhase {
    pub fn is_generating(&self) -> bool {
        matches!(self, TurnPhase::Sending { .. } | TurnPhase::Streaming { .. })
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            TurnPhase::Sending { started_at } | TurnPhase::Streaming { started_at, .. } => {
                Some(*started_at)
            }
            _ => None,
        }
    }
}

/// A named copy of the log
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub enum Action {
    /// Replace the log with a fetched history
    Load(Vec<Message>),
    Clear,
    Append(Message),
    /// Overwrite the trailing message's text
    ReplaceTrailing(String),
    /// Append a user message and the model placeholder
    BeginTurn {
        user: Message,
        started_at: DateTime<Utc>,
        /// Earlier replies carried onto the new placeholder on regenerate
        carry_versions: Vec<String>,
    },
    StreamDelta(String),
    CompleteTurn {
        conversation_id: Option<String>,
        finished_at: DateTime<Utc>,
    },
    FailTurn {
        error: String,
    },
    CancelTurn,
    ToggleFlag {
        index: usize,
        flag: Flag,
    },
    SetRating {
        index: usize,
        rating: Option<u8>,
    },
    ToggleReaction {
        index: usize,
        emoji: String,
    },
    SetTranslation {
        index: usize,
        language: String,
        text: String,
    },
    /// Swap the current text with an earlier version
    SelectVersion {
        index: usize,
        version: usize,
    },
    Delete(usize),
    /// Drop every message from `index` onward
    Truncate(usize),
    /// Collapse the span covered by the indices into one model message
    Merge(Vec<usize>),
    SaveSnapshot {
        name: String,
    },
    RestoreSnapshot(Uuid),
    DeleteSnapshot(Uuid),
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    messages: Vec<Message>,
    phase: TurnPhase,
    snapshots: Vec<Snapshot>,
    revision: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            phase: TurnPhase::Idle,
            snapshots: Vec::new(),
            revision: 0,
        }
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::new()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn phase(&self) -> &TurnPhase {
        &self.phase
    }

    pub fn is_generating(&self) -> bool {
        self.phase.is_generating()
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Bumped on every successful mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn trailing(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::User)
    }

    /// New log seeded with `[0..=index]`, detached from this conversation
    pub fn fork(&self, index: usize) -> Result<ConversationStore, StoreError> {
        self.check_index(index)?;
        let messages = self.messages[..=index]
            .iter()
            .map(Message::detached)
            .collect();
        Ok(ConversationStore::from_messages(messages))
    }

    pub fn dispatch(&mut self, action: Action) -> Result<(), StoreError> {
        self.apply(action)?;
        self.revision += 1;
        Ok(())
    }

    fn apply(&mut self, action: Action) -> Result<(), StoreError> {
        match action {
            Action::Load(messages) => {
                self.ensure_idle()?;
                self.messages = messages;
                self.phase = TurnPhase::Idle;
            }
            Action::Clear => {
                self.ensure_idle()?;
                self.messages.clear();
                self.phase = TurnPhase::Idle;
            }
            Action::Append(message) => {
                self.ensure_idle()?;
                self.messages.push(message);
            }
            Action::ReplaceTrailing(text) => {
                self.ensure_idle()?;
                let len = self.messages.len();
                let trailing = self
                    .messages
                    .last_mut()
                    .ok_or(StoreError::OutOfRange { index: 0, len })?;
                trailing.text = text;
            }
            Action::BeginTurn {
                user,
                started_at,
                carry_versions,
            } => {
                self.ensure_idle()?;
                let mut placeholder = Message::placeholder();
                placeholder.versions = carry_versions;
                self.messages.push(user);
                self.messages.push(placeholder);
                self.phase = TurnPhase::Sending { started_at };
            }
            Action::StreamDelta(delta) => {
                let started_at = self.phase.started_at().ok_or(StoreError::NotGenerating)?;
                let trailing = self.trailing_placeholder()?;
                trailing.text.push_str(&delta);
                let generated_tokens = token_estimate(&trailing.text);
                self.phase = TurnPhase::Streaming {
                    started_at,
                    generated_tokens,
                };
            }
            Action::CompleteTurn {
                conversation_id,
                finished_at,
            } => {
                let started_at = self.phase.started_at().ok_or(StoreError::NotGenerating)?;
                let response_time_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
                let trailing = self.trailing_placeholder()?;
                trailing.response_time_ms = Some(response_time_ms);
                trailing.token_count = Some(token_estimate(&trailing.text));
                self.phase = TurnPhase::Completed {
                    conversation_id,
                    response_time_ms,
                };
            }
            Action::FailTurn { error } => {
                self.phase.started_at().ok_or(StoreError::NotGenerating)?;
                let trailing = self.trailing_placeholder()?;
                trailing.text = format!("{TURN_ERROR_PREFIX}{error}");
                self.phase = TurnPhase::Errored { error };
            }
            Action::CancelTurn => {
                self.phase.started_at().ok_or(StoreError::NotGenerating)?;
                let trailing = self.trailing_placeholder()?;
                trailing.token_count = Some(token_estimate(&trailing.text));
                self.phase = TurnPhase::Cancelled;
            }
            Action::ToggleFlag { index, flag } => {
                let message = self.message_mut(index)?;
                match flag {
                    Flag::Bookmark => message.is_bookmarked = !message.is_bookmarked,
                    Flag::Pin => message.is_pinned = !message.is_pinned,
                }
            }
            Action::SetRating { index, rating } => {
                if let Some(r) = rating.filter(|r| !(1..=5).contains(r)) {
                    return Err(StoreError::InvalidRating(r));
                }
                self.message_mut(index)?.rating = rating;
            }
            Action::ToggleReaction { index, emoji } => {
                let reactions = &mut self.message_mut(index)?.reactions;
                if !reactions.remove(&emoji) {
                    reactions.insert(emoji);
                }
            }
            Action::SetTranslation {
                index,
                language,
                text,
            } => {
                self.message_mut(index)?.translations.insert(language, text);
            }
            Action::SelectVersion { index, version } => {
                let message = self.message_mut(index)?;
                let slot = message
                    .versions
                    .get_mut(version)
                    .ok_or(StoreError::UnknownVersion { index, version })?;
                std::mem::swap(slot, &mut message.text);
            }
            Action::Delete(index) => {
                self.ensure_idle()?;
                self.check_index(index)?;
                let paired = self.messages[index].role == Role::User
                    && self
                        .messages
                        .get(index + 1)
                        .is_some_and(|next| next.role == Role::Model);
                let end = if paired { index + 2 } else { index + 1 };
                self.messages.drain(index..end);
            }
            Action::Truncate(index) => {
                self.ensure_idle()?;
                self.check_index(index)?;
                self.messages.truncate(index);
            }
            Action::Merge(indices) => {
                self.ensure_idle()?;
                let (start, end) = self.merge_span(&indices)?;
                let text = self.messages[start..=end]
                    .iter()
                    .map(|m| m.text.as_str())
                    .collect::<Vec<_>>()
                    .join(MERGE_SEPARATOR);
                self.messages.drain(start..=end);
                self.messages.insert(start, Message::model(text));
            }
            Action::SaveSnapshot { name } => {
                self.ensure_idle()?;
                self.snapshots.push(Snapshot {
                    id: Uuid::new_v4(),
                    name,
                    created_at: Utc::now(),
                    messages: self.messages.clone(),
                });
            }
            Action::RestoreSnapshot(id) => {
                self.ensure_idle()?;
                let snapshot = self
                    .snapshots
                    .iter()
                    .find(|s| s.id == id)
                    .ok_or(StoreError::UnknownSnapshot(id))?;
                self.messages = snapshot.messages.clone();
            }
            Action::DeleteSnapshot(id) => {
                let before = self.snapshots.len();
                self.snapshots.retain(|s| s.id != id);
                if self.snapshots.len() == before {
                    return Err(StoreError::UnknownSnapshot(id));
                }
            }
        }
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), StoreError> {
        if self.phase.is_generating() {
            Err(StoreError::Busy)
        } else {
            Ok(())
        }
    }

    fn check_index(&self, index: usize) -> Result<(), StoreError> {
        if index < self.messages.len() {
            Ok(())
        } else {
            Err(StoreError::OutOfRange {
                index,
                len: self.messages.len(),
            })
        }
    }

    fn message_mut(&mut self, index: usize) -> Result<&mut Message, StoreError> {
        self.check_index(index)?;
        Ok(&mut self.messages[index])
    }

    fn trailing_placeholder(&mut self) -> Result<&mut Message, StoreError> {
        let len = self.messages.len();
        self.messages
            .last_mut()
            .filter(|m| m.role == Role::Model)
            .ok_or(StoreError::OutOfRange { index: len, len })
    }

    fn merge_span(&self, indices: &[usize]) -> Result<(usize, usize), StoreError> {
        let start = indices.iter().copied().min().ok_or(StoreError::MergeNeedsTwo)?;
        let end = indices.iter().copied().max().ok_or(StoreError::MergeNeedsTwo)?;
        if start == end {
            return Err(StoreError::MergeNeedsTwo);
        }
        self.check_index(end)?;
        Ok((start, end))
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
