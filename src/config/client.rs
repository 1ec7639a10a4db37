//! Dashboard client configuration loaded from TOML files
//!
//! The client configuration defines:
//! - Where the notes backend lives and how its streaming endpoint is reached
//! - Chat defaults (tone, stream timeout, greeting and quick actions)
//! - Local mirror storage settings
//! - Additional reply tones

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::tones::{Tone, DEFAULT_TONE};
use crate::conversation::Suggestion;

/// Root client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Notes backend settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Chat behaviour
    #[serde(default)]
    pub chat: ChatConfig,

    /// Local mirror storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Extra tones on top of the builtins
    #[serde(default)]
    pub tones: Vec<Tone>,
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.chat.stream_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "chat.stream_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.storage.autosave_secs == 0 {
            return Err(ConfigError::Validation(
                "storage.autosave_secs must be greater than zero".into(),
            ));
        }
        if let Some(tone) = self.tones.iter().find(|t| t.id.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "tone '{}' has an empty id",
                tone.name
            )));
        }
        Ok(())
    }
}

/// Notes backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the JSON API
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Path of the streaming chat endpoint, relative to `url`
    #[serde(default = "default_stream_path")]
    pub stream_path: String,

    /// Timeout for non-streaming requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:3001/api".to_string()
}

fn default_stream_path() -> String {
    "/ai-chat/stream".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            stream_path: default_stream_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Chat behaviour configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Tone used for new sessions
    #[serde(default = "default_tone")]
    pub default_tone: String,

    /// Hard limit for one streamed turn
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,

    /// Greeting shown when a new chat starts; `{assistant}` is replaced
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Quick actions attached to the greeting
    #[serde(default = "default_suggestions")]
    pub suggestions: Vec<Suggestion>,
}

fn default_tone() -> String {
    DEFAULT_TONE.to_string()
}

fn default_stream_timeout() -> u64 {
    120
}

fn default_greeting() -> String {
    "你好！我是{assistant}，可以帮你整理笔记、总结内容、润色文字或回答问题。有什么可以帮你的吗？"
        .to_string()
}

fn default_suggestions() -> Vec<Suggestion> {
    [
        ("📝", "总结笔记", "请帮我总结这篇笔记的要点。"),
        ("✨", "润色文字", "请帮我润色下面这段文字："),
        ("🌐", "翻译", "请把下面的内容翻译成英文："),
        ("💡", "头脑风暴", "我想围绕一个主题进行头脑风暴："),
    ]
    .into_iter()
    .map(|(icon, label, prompt)| Suggestion {
        icon: icon.to_string(),
        label: label.to_string(),
        prompt: prompt.to_string(),
    })
    .collect()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_tone: default_tone(),
            stream_timeout_secs: default_stream_timeout(),
            greeting: default_greeting(),
            suggestions: default_suggestions(),
        }
    }
}

/// Local mirror configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file for the mirror; defaults to `<data dir>/scribe-chat.db`
    #[serde(default)]
    pub mirror_path: Option<PathBuf>,

    /// Draft autosave interval
    #[serde(default = "default_autosave")]
    pub autosave_secs: u64,
}

fn default_autosave() -> u64 {
    30
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mirror_path: None,
            autosave_secs: default_autosave(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
