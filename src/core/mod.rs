//! Core chat components
//!
//! Message building, turn streaming, the conversation store with its derived
//! views, and the session that ties them to the backend.

pub mod attachments;
pub mod builder;
pub mod export;
pub mod mirror;
pub mod session;
pub mod store;
pub mod stream;
pub mod views;

pub use attachments::{Attachment, AttachmentPayload};
pub use builder::{build, BuildInput, BuiltMessage, OutboundMessage};
pub use export::ExportFormat;
pub use mirror::{spawn_draft_autosave, LocalMirror, MemoryMirror, MirrorError, SqliteMirror};
pub use session::{ChatSession, SendInput, SessionError, SessionEvent, SessionOptions, SessionPorts, TurnReport, TurnStatus};
pub use store::{Action, ConversationStore, Flag, StoreError, TurnPhase};
pub use stream::{ChatTransport, StreamChunk, StreamHandler, TransportError, TurnCanceller, TurnOutcome};
