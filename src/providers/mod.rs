//! AI provider integrations known to the notes backend

pub mod resolver;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use resolver::{resolve, ResolveError, ResolveInput, Resolved};

/// Backend integration a model is routed through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    DeepSeek,
    Qwen,
    Zhipu,
    Moonshot,
    Ollama,
    OpenAiCompatible,
    Other(String),
}

impl ProviderKind {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "openai" => ProviderKind::OpenAi,
            "anthropic" | "claude" => ProviderKind::Anthropic,
            "gemini" | "google" => ProviderKind::Gemini,
            "deepseek" => ProviderKind::DeepSeek,
            "qwen" | "dashscope" | "tongyi" => ProviderKind::Qwen,
            "zhipu" | "glm" => ProviderKind::Zhipu,
            "moonshot" | "kimi" => ProviderKind::Moonshot,
            "ollama" => ProviderKind::Ollama,
            "openai-compatible" | "openai_compatible" | "custom" => ProviderKind::OpenAiCompatible,
            _ => ProviderKind::Other(name.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::DeepSeek => "deepseek",
            ProviderKind::Qwen => "qwen",
            ProviderKind::Zhipu => "zhipu",
            ProviderKind::Moonshot => "moonshot",
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAiCompatible => "openai-compatible",
            ProviderKind::Other(name) => name,
        }
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        ProviderKind::OpenAi
    }
}

impl From<String> for ProviderKind {
    fn from(name: String) -> Self {
        ProviderKind::from_name(&name)
    }
}

impl From<ProviderKind> for String {
    fn from(kind: ProviderKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_is_case_insensitive() {
        assert_eq!(ProviderKind::from_name("OpenAI"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_name(" Kimi "), ProviderKind::Moonshot);
        assert_eq!(
            ProviderKind::from_name("mistral"),
            ProviderKind::Other("mistral".into())
        );
    }

    #[test]
    fn test_serde_uses_plain_strings() {
        let json = serde_json::to_string(&ProviderKind::DeepSeek).unwrap();
        assert_eq!(json, "\"deepseek\"");
        let back: ProviderKind = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(back, ProviderKind::Anthropic);
    }
}
