//! Transcript export

use std::fmt::Write as _;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::conversation::{Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Markdown,
    Json,
    Text,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
            ExportFormat::Text => "txt",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Text => "text/plain; charset=utf-8",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            "json" => Ok(ExportFormat::Json),
            "txt" | "text" => Ok(ExportFormat::Text),
            other => Err(format!("unknown export format: {other}")),
        }
    }
}

fn label(role: Role) -> &'static str {
    match role {
        Role::User => "用户",
        Role::Model => "助手",
        Role::System => "系统",
    }
}

/// Render a transcript; greeting messages are left out
pub fn export(title: &str, messages: &[Message], format: ExportFormat) -> String {
    let messages = messages.iter().filter(|m| !m.is_greeting());
    match format {
        ExportFormat::Markdown => {
            let mut out = format!("# {title}\n");
            for m in messages {
                let _ = write!(
                    out,
                    "\n**{}** · {}\n\n{}\n",
                    label(m.role),
                    m.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    m.text
                );
            }
            out
        }
        ExportFormat::Text => {
            let mut out = format!("{title}\n{}\n", "=".repeat(title.chars().count().max(3)));
            for m in messages {
                let _ = write!(
                    out,
                    "\n[{}] {}:\n{}\n",
                    m.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    label(m.role),
                    m.text
                );
            }
            out
        }
        ExportFormat::Json => {
            let messages: Vec<_> = messages
                .map(|m| {
                    json!({
                        "role": m.role,
                        "text": m.text,
                        "timestamp": m.timestamp,
                        "isBookmarked": m.is_bookmarked,
                        "isPinned": m.is_pinned,
                        "rating": m.rating,
                    })
                })
                .collect();
            serde_json::to_string_pretty(&json!({ "title": title, "messages": messages }))
                .unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Suggestion;

    fn log() -> Vec<Message> {
        vec![
            Message::model("欢迎").with_suggestions(vec![Suggestion {
                icon: "💡".into(),
                label: "idea".into(),
                prompt: "idea".into(),
            }]),
            Message::user("What is a monad?"),
            Message::model("A monoid in the category of endofunctors."),
        ]
    }

    #[test]
    fn test_markdown_export() {
        let md = export("Monads", &log(), ExportFormat::Markdown);
        assert!(md.starts_with("# Monads\n"));
        assert!(md.contains("**用户**"));
        assert!(md.contains("A monoid in the category of endofunctors."));
        assert!(!md.contains("欢迎"));
    }

    #[test]
    fn test_json_and_text_export() {
        let json: serde_json::Value =
            serde_json::from_str(&export("Monads", &log(), ExportFormat::Json)).unwrap();
        assert_eq!(json["messages"].as_array().unwrap().len(), 2);
        assert_eq!(json["messages"][0]["role"], "user");

        let text = export("Monads", &log(), ExportFormat::Text);
        assert!(text.starts_with("Monads\n======\n"));
        assert!(text.contains("助手:"));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("MD".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert!("pdf".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Json.extension(), "json");
    }
}
