//! Conversation sessions: live per-user history, the registry that owns it,
//! and history compression.

mod compactor;
mod registry;
mod types;

pub use compactor::{needs_compression, HistoryCompressor, SUMMARY_PREFIX};
pub use registry::SessionRegistry;
pub use types::{MessageRole, Session, SessionMessage};
