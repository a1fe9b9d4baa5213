//! Error taxonomy of the message pipeline.
//!
//! Every variant is local to one event: the pipeline logs it, applies the
//! matching fallback and keeps serving other events.

use crate::provider::ProviderError;

/// Result type for pipeline operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Pipeline error type.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No gateway connection is held; outbound messages are dropped.
    #[error("Gateway transport unavailable")]
    TransportUnavailable,

    /// Chat completion failed; the user gets the apology message.
    #[error("LLM request failed: {0}")]
    LlmRequest(#[from] ProviderError),

    /// History summary failed; compression falls back to truncation.
    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// Inbound payload could not be decoded; discarded without reply.
    #[error("Malformed inbound event: {0}")]
    MalformedEvent(String),

    /// Session points at a persona that is no longer in the catalog.
    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    /// Persistence collaborator failed.
    #[error("Store error: {0}")]
    Store(#[from] qqbot_common::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
