//! Outbound request assembly for one turn
//!
//! Produces the text shown in the transcript, the text sent upstream, the
//! extracted image payloads and the outbound history. Pure over its inputs.

use serde::{Deserialize, Serialize};

use crate::config::ToneRegistry;
use crate::conversation::{Message, Role};

use super::attachments::{Attachment, AttachmentPayload};
use super::store::TURN_ERROR_PREFIX;

/// Header preceding inlined text attachments
pub const ATTACHMENT_MARKER: &str = "[附件内容]";

/// One message of the outbound history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub role: String,
    pub content: String,
}

impl OutboundMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role: role.wire_name().to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub name: String,
    pub mime_type: String,
    /// Base64 encoded bytes
    pub data: String,
}

#[derive(Debug, Clone, Copy)]
pub struct BuildInput<'a> {
    pub user_text: &'a str,
    pub attachments: &'a [Attachment],
    pub reply_quote: Option<&'a str>,
    pub tone_id: &'a str,
    pub tones: &'a ToneRegistry,
    /// Assistant persona prompt, leads the outbound history
    pub system_prompt: Option<&'a str>,
    /// Log before this turn's messages are appended
    pub history: &'a [Message],
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltMessage {
    pub display_text: String,
    pub wire_text: String,
    pub images: Vec<ImagePayload>,
    pub outbound: Vec<OutboundMessage>,
}

pub fn build(input: BuildInput<'_>) -> BuiltMessage {
    let quote = input.reply_quote.map(str::trim).filter(|q| !q.is_empty());
    let display_text = display_text(input.user_text, quote);
    let wire_text = wire_text(input.user_text, quote, input.attachments);

    let images: Vec<ImagePayload> = input
        .attachments
        .iter()
        .filter(|a| a.error.is_none())
        .filter_map(|a| match &a.payload {
            AttachmentPayload::Image { data } => Some(ImagePayload {
                name: a.name.clone(),
                mime_type: a.mime_type.clone(),
                data: data.clone(),
            }),
            _ => None,
        })
        .collect();

    let mut outbound = Vec::with_capacity(input.history.len() + 4);
    if let Some(prompt) = input.system_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        outbound.push(OutboundMessage::new(Role::System, prompt));
    }
    if let Some(instruction) = input.tones.instruction(input.tone_id) {
        outbound.push(OutboundMessage::new(Role::System, instruction));
    }
    if !images.is_empty() {
        outbound.push(OutboundMessage::new(
            Role::System,
            format!("用户上传了 {} 张图片，请结合图片内容进行回答。", images.len()),
        ));
    }
    outbound.extend(
        input
            .history
            .iter()
            .filter(|m| sendable(m))
            .map(|m| OutboundMessage::new(m.role, m.text.clone())),
    );
    outbound.push(OutboundMessage::new(Role::User, wire_text.clone()));

    BuiltMessage {
        display_text,
        wire_text,
        images,
        outbound,
    }
}

/// Greetings, empty placeholders and failed replies stay local
fn sendable(message: &Message) -> bool {
    if message.is_greeting() || message.text.trim().is_empty() {
        return false;
    }
    !(message.role == Role::Model && message.text.starts_with(TURN_ERROR_PREFIX))
}

fn display_text(text: &str, quote: Option<&str>) -> String {
    match quote {
        Some(quote) => {
            let quoted = quote
                .lines()
                .map(|line| format!("> {line}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!("{quoted}\n\n{text}")
        }
        None => text.to_string(),
    }
}

fn wire_text(text: &str, quote: Option<&str>, attachments: &[Attachment]) -> String {
    let mut wire = match quote {
        Some(quote) => format!("[引用内容: \"{quote}\"]\n\n{text}"),
        None => text.to_string(),
    };

    let mut texts = attachments
        .iter()
        .filter(|a| a.error.is_none())
        .filter_map(|a| match &a.payload {
            AttachmentPayload::Text { content } => Some((a.name.as_str(), content.as_str())),
            _ => None,
        })
        .peekable();
    if texts.peek().is_some() {
        wire.push_str("\n\n");
        wire.push_str(ATTACHMENT_MARKER);
        for (name, content) in texts {
            wire.push_str(&format!("\n--- {name} ---\n{content}\n"));
        }
    }
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TONE;
    use crate::conversation::Suggestion;
    use crate::core::attachments::process_bytes;

    fn input<'a>(
        text: &'a str,
        attachments: &'a [Attachment],
        tones: &'a ToneRegistry,
        history: &'a [Message],
    ) -> BuildInput<'a> {
        BuildInput {
            user_text: text,
            attachments,
            reply_quote: None,
            tone_id: DEFAULT_TONE,
            tones,
            system_prompt: None,
            history,
        }
    }

    #[test]
    fn test_plain_message() {
        let tones = ToneRegistry::builtin();
        let built = build(input("hello", &[], &tones, &[]));
        assert_eq!(built.display_text, "hello");
        assert_eq!(built.wire_text, "hello");
        assert!(built.images.is_empty());
        assert_eq!(
            built.outbound,
            vec![OutboundMessage {
                role: "user".into(),
                content: "hello".into()
            }]
        );
    }

    #[test]
    fn test_quote_formats_differ() {
        let tones = ToneRegistry::builtin();
        let mut req = input("explain", &[], &tones, &[]);
        req.reply_quote = Some("line one\nline two");
        let built = build(req);
        assert_eq!(built.display_text, "> line one\n> line two\n\nexplain");
        assert_eq!(
            built.wire_text,
            "[引用内容: \"line one\nline two\"]\n\nexplain"
        );
    }

    #[test]
    fn test_attachments_split_into_text_and_images() {
        let tones = ToneRegistry::builtin();
        let attachments = vec![
            process_bytes("todo.txt", None, b"buy milk"),
            process_bytes("cat.jpg", None, &[9, 9]),
            process_bytes("blob.bin", None, &[0]),
        ];
        let built = build(input("look", &attachments, &tones, &[]));
        assert_eq!(
            built.wire_text,
            "look\n\n[附件内容]\n--- todo.txt ---\nbuy milk\n"
        );
        assert_eq!(built.images.len(), 1);
        assert_eq!(built.images[0].mime_type, "image/jpeg");
        assert_eq!(built.outbound[0].role, "system");
        assert!(built.outbound[0].content.contains("1 张图片"));
    }

    #[test]
    fn test_system_messages_order_and_history_filter() {
        let tones = ToneRegistry::builtin();
        let history = vec![
            Message::model("你好").with_suggestions(vec![Suggestion {
                icon: "📝".into(),
                label: "总结".into(),
                prompt: "总结".into(),
            }]),
            Message::user("q1"),
            Message::model(format!("{TURN_ERROR_PREFIX}timeout")),
            Message::user("q2"),
            Message::model("a2"),
        ];
        let mut req = input("q3", &[], &tones, &history);
        req.tone_id = "concise";
        req.system_prompt = Some("You are a note assistant.");
        let built = build(req);

        let roles: Vec<&str> = built.outbound.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "system", "user", "user", "assistant", "user"]);
        assert_eq!(built.outbound[0].content, "You are a note assistant.");
        assert_eq!(built.outbound[1].content, tones.instruction("concise").unwrap());
        assert_eq!(built.outbound.last().unwrap().content, "q3");
    }
}
