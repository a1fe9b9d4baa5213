//! OneBot wire types for the gateway connection.
//!
//! The gateway pushes JSON events over the reverse WebSocket and accepts
//! JSON actions on the same socket. Only private text messages enter the
//! pipeline; heartbeats, lifecycle events, group traffic and action echoes
//! are ignored.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// QQ user identifier as sent by the gateway.
pub type UserId = i64;

/// Raw event envelope. Every field is optional so that unrelated event kinds
/// (meta events, action responses) deserialize cleanly and can be skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    #[serde(default)]
    pub post_type: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub sender: Option<Sender>,
    #[serde(default)]
    pub raw_message: Option<String>,
    /// String form, or the array-of-segments form of OneBot 11
    #[serde(default)]
    pub message: Option<Value>,
}

/// Sender block of a message event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub nickname: Option<String>,
}

/// A private message ready for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage {
    pub user_id: UserId,
    pub nickname: String,
    /// Message text, trimmed
    pub text: String,
}

impl GatewayEvent {
    /// Whether this is a private message event.
    pub fn is_private_message(&self) -> bool {
        self.post_type.as_deref() == Some("message")
            && self.message_type.as_deref() == Some("private")
    }

    /// Resolve the message text: `raw_message` when present and non-empty,
    /// otherwise the `message` field (string, or concatenated text segments).
    fn text(&self) -> String {
        if let Some(raw) = self.raw_message.as_deref().filter(|s| !s.is_empty()) {
            return raw.to_string();
        }
        match &self.message {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(segments)) => segments
                .iter()
                .filter(|seg| seg.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|seg| seg.pointer("/data/text").and_then(Value::as_str))
                .collect(),
            _ => String::new(),
        }
    }
}

/// Parse one frame from the gateway.
///
/// Returns `Ok(None)` for well-formed events that are not private messages,
/// and [`RelayError::MalformedEvent`] for payloads that are not JSON or that
/// claim to be a private message without a user id.
pub fn parse_event(raw: &str) -> RelayResult<Option<PrivateMessage>> {
    let event: GatewayEvent =
        serde_json::from_str(raw).map_err(|e| RelayError::MalformedEvent(e.to_string()))?;

    if !event.is_private_message() {
        return Ok(None);
    }

    let user_id = event
        .user_id
        .ok_or_else(|| RelayError::MalformedEvent("private message without user_id".into()))?;

    let nickname = event
        .sender
        .as_ref()
        .and_then(|s| s.nickname.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| user_id.to_string());

    Ok(Some(PrivateMessage {
        user_id,
        nickname,
        text: event.text().trim().to_string(),
    }))
}

/// Outbound action sent to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundAction {
    pub action: &'static str,
    pub params: SendPrivateMsgParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendPrivateMsgParams {
    pub user_id: UserId,
    pub message: String,
}

impl OutboundAction {
    /// Build a `send_private_msg` action.
    pub fn send_private_msg(user_id: UserId, message: impl Into<String>) -> Self {
        Self {
            action: "send_private_msg",
            params: SendPrivateMsgParams {
                user_id,
                message: message.into(),
            },
        }
    }

    /// Serialize to the JSON text frame.
    pub fn to_frame(&self) -> RelayResult<String> {
        serde_json::to_string(self).map_err(|e| RelayError::Internal(e.to_string()))
    }
}
