//! System prompt composition.

use crate::error::RelayError;
use crate::persona::PersonaCatalog;
use crate::provider::ChatMessage;
use crate::session::Session;
use qqbot_common::ChatConfig;

/// Build the message list for a chat completion: the system prompt followed
/// by the newest `2 × maxHistoryLength` history messages.
pub async fn compose(
    session: &Session,
    config: &ChatConfig,
    personas: &PersonaCatalog,
) -> Vec<ChatMessage> {
    let persona_prompt = match personas.find_by_id(&session.persona_id).await {
        Some(persona) => persona.prompt,
        None => {
            let err = RelayError::UnknownPersona(session.persona_id.clone());
            tracing::warn!(user_id = session.user_id, error = %err, "Falling back to first persona");
            personas.first().await.map(|p| p.prompt).unwrap_or_default()
        }
    };

    let mut messages = Vec::with_capacity(config.history_window() + 1);
    messages.push(ChatMessage::system(system_prompt(
        &config.global_prompt,
        &persona_prompt,
    )));
    messages.extend(
        session
            .tail(config.history_window())
            .iter()
            .map(|m| m.to_chat_message()),
    );
    messages
}

fn system_prompt(global: &str, persona: &str) -> String {
    if global.is_empty() {
        persona.to_string()
    } else {
        format!("{global}\n\n{persona}")
    }
}
