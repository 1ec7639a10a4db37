//! Reply tones and the tone registry
//!
//! A tone is an instruction injected as a system message ahead of the
//! conversation history. The `default` tone injects nothing. Extra tones can
//! be declared in the client config or loaded from a directory of TOML files.
//!
//! # Example Tone File
//!
//! ```toml
//! [tone]
//! id = "socratic"
//! name = "苏格拉底式"
//! description = "Answer with guiding questions"
//!
//! [instruction]
//! content = "请用提问引导的方式回答，帮助用户自己得出结论。"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// Identifier of the tone that injects no instruction
pub const DEFAULT_TONE: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// System instruction, empty for the default tone
    #[serde(default)]
    pub instruction: String,
}

impl Tone {
    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_TONE || self.instruction.trim().is_empty()
    }
}

/// On-disk tone file layout
#[derive(Debug, Deserialize)]
struct ToneFile {
    tone: ToneHeader,
    instruction: ToneInstruction,
}

#[derive(Debug, Deserialize)]
struct ToneHeader {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ToneInstruction {
    content: String,
}

impl From<ToneFile> for Tone {
    fn from(file: ToneFile) -> Self {
        Self {
            id: file.tone.id,
            name: file.tone.name,
            description: file.tone.description,
            instruction: file.instruction.content,
        }
    }
}

/// Known tones by id, builtins first
#[derive(Debug, Clone)]
pub struct ToneRegistry {
    tones: BTreeMap<String, Tone>,
}

impl ToneRegistry {
    /// Registry holding only the builtin tones
    pub fn builtin() -> Self {
        let tones = builtin::ALL
            .iter()
            .map(|(id, name, instruction)| {
                (
                    id.to_string(),
                    Tone {
                        id: id.to_string(),
                        name: name.to_string(),
                        description: String::new(),
                        instruction: instruction.to_string(),
                    },
                )
            })
            .collect();
        Self { tones }
    }

    /// Add or replace a tone
    pub fn register(&mut self, tone: Tone) {
        self.tones.insert(tone.id.clone(), tone);
    }

    pub fn get(&self, id: &str) -> Option<&Tone> {
        self.tones.get(id)
    }

    /// Instruction text for a tone, `None` for the default or unknown tones
    pub fn instruction(&self, id: &str) -> Option<&str> {
        self.get(id)
            .filter(|tone| !tone.is_default())
            .map(|tone| tone.instruction.as_str())
    }

    pub fn list(&self) -> impl Iterator<Item = &Tone> {
        self.tones.values()
    }

    /// Load every `*.toml` tone file in a directory into the registry
    pub async fn load_dir(&mut self, dir: &Path) -> Result<usize, ToneError> {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| ToneError::IoError(e.to_string()))?;

        let mut loaded = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToneError::IoError(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "toml") {
                let tone = Self::load_from_file(&path).await?;
                tracing::debug!(tone = %tone.id, "Loaded tone from {}", path.display());
                self.register(tone);
                loaded += 1;
            }
        }

        Ok(loaded)
    }

    /// Parse a single tone file
    pub async fn load_from_file(path: &Path) -> Result<Tone, ToneError> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ToneError::IoError(e.to_string()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Tone, ToneError> {
        let file: ToneFile =
            toml::from_str(content).map_err(|e| ToneError::ParseError(e.to_string()))?;
        Ok(file.into())
    }
}

impl Default for ToneRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Errors from tone loading
#[derive(Debug, thiserror::Error)]
pub enum ToneError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Built-in tones that don't require files
pub mod builtin {
    /// `(id, display name, instruction)`
    pub const ALL: &[(&str, &str, &str)] = &[
        (super::DEFAULT_TONE, "默认", ""),
        (
            "professional",
            "专业",
            "请使用专业、严谨的语气回答，用词准确，结构清晰，必要时给出依据。",
        ),
        (
            "casual",
            "轻松",
            "请使用轻松、口语化的语气回答，就像和朋友聊天一样。",
        ),
        (
            "concise",
            "简洁",
            "请尽量简洁地回答，只给出要点，避免冗长的解释。",
        ),
        (
            "detailed",
            "详细",
            "请详细、全面地回答，分步骤解释，并在合适的地方给出示例。",
        ),
        (
            "creative",
            "创意",
            "请发挥创意，用生动、富有想象力的方式回答。",
        ),
    ];
}
