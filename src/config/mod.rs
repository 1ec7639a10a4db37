//! Application configuration

pub mod client;
pub mod tones;

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use client::{ClientConfig, ConfigError};
pub use tones::{Tone, ToneRegistry, DEFAULT_TONE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backend_token: Option<String>,
    pub backend_username: Option<String>,
    pub backend_password: Option<String>,
    pub data_dir: PathBuf,
    /// Directory of extra tone files
    pub tones_dir: Option<PathBuf>,
    pub client: ClientConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut client = match env::var("SCRIBE_CONFIG") {
            Ok(path) => ClientConfig::from_file(&PathBuf::from(path))?,
            Err(_) => ClientConfig::default(),
        };

        if let Ok(url) = env::var("SCRIBE_BACKEND_URL") {
            client.backend.url = url;
        }
        if let Some(secs) = env::var("SCRIBE_STREAM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|s| *s > 0)
        {
            client.chat.stream_timeout_secs = secs;
        }

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3080),
            backend_token: env::var("SCRIBE_BACKEND_TOKEN").ok(),
            backend_username: env::var("SCRIBE_USERNAME").ok(),
            backend_password: env::var("SCRIBE_PASSWORD").ok(),
            data_dir: env::var("SCRIBE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            tones_dir: env::var("SCRIBE_TONES_DIR").ok().map(PathBuf::from),
            client,
        })
    }

    /// Location of the SQLite mirror
    pub fn mirror_path(&self) -> PathBuf {
        self.client
            .storage
            .mirror_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("scribe-chat.db"))
    }

    /// Builtin tones plus the ones declared in the client config
    pub fn tone_registry(&self) -> ToneRegistry {
        let mut registry = ToneRegistry::builtin();
        for tone in &self.client.tones {
            registry.register(tone.clone());
        }
        registry
    }
}
