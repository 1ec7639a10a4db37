//! Attachment processing
//!
//! Uploaded files become either inline text or base64 image payloads. A file
//! that cannot be used keeps its entry with `error` set so it can still be
//! shown, and the message builder leaves it out of the outbound request.

use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest file accepted, in bytes
pub const MAX_ATTACHMENT_SIZE: usize = 10 * 1024 * 1024;

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "markdown", "csv", "json", "xml", "yaml", "yml", "toml", "html", "htm", "log",
    "rs", "py", "js", "ts", "tsx", "jsx", "java", "go", "c", "h", "cpp", "sql", "sh",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AttachmentPayload {
    Text { content: String },
    Image { data: String },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub size: usize,
    pub payload: AttachmentPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Attachment {
    pub fn is_usable(&self) -> bool {
        self.error.is_none() && self.payload != AttachmentPayload::None
    }

    pub fn is_image(&self) -> bool {
        matches!(self.payload, AttachmentPayload::Image { .. })
    }

    fn failed(name: &str, mime_type: &str, size: usize, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size,
            payload: AttachmentPayload::None,
            error: Some(error.into()),
        }
    }
}

/// Best-effort mime type from a file name
pub fn guess_mime(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "html" | "htm" => "text/html",
        "pdf" => "application/pdf",
        e if TEXT_EXTENSIONS.contains(&e) => "text/plain",
        _ => "application/octet-stream",
    }
}

fn is_text(name: &str, mime_type: &str) -> bool {
    if mime_type.starts_with("text/")
        || matches!(
            mime_type,
            "application/json" | "application/xml" | "application/x-yaml" | "application/toml"
        )
    {
        return true;
    }
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| TEXT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
}

/// Turn raw file bytes into an attachment
pub fn process_bytes(name: &str, mime_type: Option<&str>, bytes: &[u8]) -> Attachment {
    let mime_type = mime_type
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| guess_mime(name));
    let size = bytes.len();

    if size > MAX_ATTACHMENT_SIZE {
        return Attachment::failed(name, mime_type, size, "文件过大，最大支持 10MB");
    }

    let payload = if mime_type.starts_with("image/") {
        AttachmentPayload::Image {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    } else if is_text(name, mime_type) {
        match std::str::from_utf8(bytes) {
            Ok(text) => AttachmentPayload::Text {
                content: text.to_string(),
            },
            Err(e) => {
                tracing::warn!(file = name, "Attachment is not valid UTF-8: {}", e);
                return Attachment::failed(name, mime_type, size, "文件解析失败：不是有效的文本编码");
            }
        }
    } else {
        return Attachment::failed(name, mime_type, size, format!("不支持的文件类型：{mime_type}"));
    };

    Attachment {
        id: Uuid::new_v4(),
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        size,
        payload,
        error: None,
    }
}

/// Read and process a file from disk
pub async fn process_path(path: &Path) -> Attachment {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    match tokio::fs::read(path).await {
        Ok(bytes) => process_bytes(&name, None, &bytes),
        Err(e) => Attachment::failed(&name, guess_mime(&name), 0, format!("读取文件失败：{e}")),
    }
}
