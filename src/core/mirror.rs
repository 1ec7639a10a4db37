//! Local mirror of drafts and conversation logs
//!
//! Best-effort copy of session state that survives a restart. The backend
//! stays the source of truth; the mirror is last-write-wins and is re-fetched
//! over on load. Provides a SQLite implementation and an in-memory one.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::conversation::Message;

/// Key used for logs and drafts of a chat not yet saved by the backend
pub const UNSAVED_KEY: &str = "__new__";

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read/write port for session state kept on the local machine
#[async_trait]
pub trait LocalMirror: Send + Sync {
    async fn save_draft(&self, key: &str, text: &str) -> Result<(), MirrorError>;

    async fn load_draft(&self, key: &str) -> Result<Option<String>, MirrorError>;

    async fn clear_draft(&self, key: &str) -> Result<(), MirrorError>;

    async fn save_log(&self, key: &str, messages: &[Message]) -> Result<(), MirrorError>;

    async fn load_log(&self, key: &str) -> Result<Option<Vec<Message>>, MirrorError>;

    async fn remove_log(&self, key: &str) -> Result<(), MirrorError>;
}

/// Mirror stored in SQLite
pub struct SqliteMirror {
    pool: SqlitePool,
}

impl SqliteMirror {
    /// Open (or create) the mirror database at the given path
    pub async fn new(db_path: &Path) -> Result<Self, MirrorError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let mirror = Self { pool };
        mirror.init_schema().await?;
        Ok(mirror)
    }

    /// Create an in-memory mirror
    pub async fn new_in_memory() -> Result<Self, MirrorError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let mirror = Self { pool };
        mirror.init_schema().await?;
        Ok(mirror)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS drafts (
                key TEXT PRIMARY KEY,
                text TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cached_logs (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl LocalMirror for SqliteMirror {
    async fn save_draft(&self, key: &str, text: &str) -> Result<(), MirrorError> {
        sqlx::query(
            r#"
            INSERT INTO drafts (key, text) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET text = excluded.text, updated_at = datetime('now')
            "#,
        )
        .bind(key)
        .bind(text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_draft(&self, key: &str) -> Result<Option<String>, MirrorError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT text FROM drafts WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(text,)| text))
    }

    async fn clear_draft(&self, key: &str) -> Result<(), MirrorError> {
        sqlx::query("DELETE FROM drafts WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_log(&self, key: &str, messages: &[Message]) -> Result<(), MirrorError> {
        let payload = serde_json::to_string(messages)?;
        sqlx::query(
            r#"
            INSERT INTO cached_logs (key, payload) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, updated_at = datetime('now')
            "#,
        )
        .bind(key)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_log(&self, key: &str) -> Result<Option<Vec<Message>>, MirrorError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT payload FROM cached_logs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(payload,)| serde_json::from_str(&payload))
            .transpose()
            .map_err(MirrorError::from)
    }

    async fn remove_log(&self, key: &str) -> Result<(), MirrorError> {
        sqlx::query("DELETE FROM cached_logs WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Mirror kept in process memory
#[derive(Default)]
pub struct MemoryMirror {
    drafts: Mutex<HashMap<String, String>>,
    logs: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalMirror for MemoryMirror {
    async fn save_draft(&self, key: &str, text: &str) -> Result<(), MirrorError> {
        self.drafts.lock().await.insert(key.to_string(), text.to_string());
        Ok(())
    }

    async fn load_draft(&self, key: &str) -> Result<Option<String>, MirrorError> {
        Ok(self.drafts.lock().await.get(key).cloned())
    }

    async fn clear_draft(&self, key: &str) -> Result<(), MirrorError> {
        self.drafts.lock().await.remove(key);
        Ok(())
    }

    async fn save_log(&self, key: &str, messages: &[Message]) -> Result<(), MirrorError> {
        self.logs.lock().await.insert(key.to_string(), messages.to_vec());
        Ok(())
    }

    async fn load_log(&self, key: &str) -> Result<Option<Vec<Message>>, MirrorError> {
        Ok(self.logs.lock().await.get(key).cloned())
    }

    async fn remove_log(&self, key: &str) -> Result<(), MirrorError> {
        self.logs.lock().await.remove(key);
        Ok(())
    }
}

/// Draft text published by the input box, keyed by conversation
pub type DraftState = (String, String);

/// Periodically write the latest draft to the mirror.
///
/// Only writes when the draft changed since the last write; stops after a
/// final flush once every sender of `drafts` is dropped.
pub fn spawn_draft_autosave(
    mirror: Arc<dyn LocalMirror>,
    mut drafts: watch::Receiver<DraftState>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut dirty = false;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if dirty {
                        flush_draft(mirror.as_ref(), &drafts).await;
                        dirty = false;
                    }
                }
                changed = drafts.changed() => match changed {
                    Ok(()) => dirty = true,
                    Err(_) => {
                        if dirty {
                            flush_draft(mirror.as_ref(), &drafts).await;
                        }
                        break;
                    }
                },
            }
        }
    })
}

async fn flush_draft(mirror: &dyn LocalMirror, drafts: &watch::Receiver<DraftState>) {
    let (key, text) = drafts.borrow().clone();
    let result = if text.is_empty() {
        mirror.clear_draft(&key).await
    } else {
        mirror.save_draft(&key, &text).await
    };
    match result {
        Ok(()) => tracing::debug!(key = %key, "Draft autosaved"),
        Err(e) => tracing::warn!(key = %key, "Draft autosave failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_mirror_round_trip() {
        let mirror = SqliteMirror::new_in_memory().await.unwrap();

        mirror.save_draft("c1", "half a thought").await.unwrap();
        mirror.save_draft("c1", "a whole thought").await.unwrap();
        assert_eq!(
            mirror.load_draft("c1").await.unwrap().as_deref(),
            Some("a whole thought")
        );
        mirror.clear_draft("c1").await.unwrap();
        assert!(mirror.load_draft("c1").await.unwrap().is_none());

        let log = vec![Message::user("Hello"), Message::model("Hi there!")];
        mirror.save_log("c1", &log).await.unwrap();
        let loaded = mirror.load_log("c1").await.unwrap().unwrap();
        assert_eq!(loaded, log);
        mirror.remove_log("c1").await.unwrap();
        assert!(mirror.load_log("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_mirror() {
        let mirror = MemoryMirror::new();
        mirror.save_log(UNSAVED_KEY, &[Message::user("x")]).await.unwrap();
        assert_eq!(mirror.load_log(UNSAVED_KEY).await.unwrap().unwrap().len(), 1);
        assert!(mirror.load_draft("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_autosave_writes_latest_draft() {
        let mirror = Arc::new(MemoryMirror::new());
        let (tx, rx) = watch::channel((UNSAVED_KEY.to_string(), String::new()));
        let handle = spawn_draft_autosave(mirror.clone(), rx, Duration::from_millis(10));

        tx.send((UNSAVED_KEY.to_string(), "dra".into())).unwrap();
        tx.send((UNSAVED_KEY.to_string(), "draft".into())).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            mirror.load_draft(UNSAVED_KEY).await.unwrap().as_deref(),
            Some("draft")
        );

        tx.send(("c7".to_string(), "final words".into())).unwrap();
        drop(tx);
        handle.await.unwrap();
        assert_eq!(
            mirror.load_draft("c7").await.unwrap().as_deref(),
            Some("final words")
        );
    }
}
