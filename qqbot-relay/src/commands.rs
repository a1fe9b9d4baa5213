//! Slash commands.
//!
//! Commands are parsed once into [`Command`] and executed against the
//! caller's locked session. Text that is not a known command, including
//! unknown `/...` input, is [`Command::Chat`] and goes to the model verbatim.

use crate::persona::PersonaCatalog;
use crate::session::Session;
use std::fmt::Write;
use std::sync::Arc;

pub const COMMAND_PREFIX: char = '/';

const HELP_TEXT: &str = "📋 指令列表：\n\
/help - 显示此帮助\n\
/new - 开始新对话\n\
/person <序号> - 切换人格\n\
/person_ls - 查看人格列表";

const NEW_TEXT: &str = "✨ 已开始新对话";
const PERSON_USAGE: &str = "用法: /person 序号 (如 /person 1)";

/// A parsed inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    New,
    PersonList,
    /// `/person <n>`; `None` when the argument is missing or not an integer
    PersonSwitch(Option<i64>),
    /// Not a command
    Chat,
}

impl Command {
    /// Parse trimmed inbound text.
    pub fn parse(text: &str) -> Self {
        if !text.starts_with(COMMAND_PREFIX) {
            return Self::Chat;
        }

        let mut parts = text.split_whitespace();
        match parts.next() {
            Some("/help") => Self::Help,
            Some("/new") => Self::New,
            Some("/person_ls") => Self::PersonList,
            Some("/person") => Self::PersonSwitch(parts.next().and_then(|n| n.parse().ok())),
            _ => Self::Chat,
        }
    }
}

/// Executes commands against a user's session.
pub struct CommandDispatcher {
    personas: Arc<PersonaCatalog>,
}

impl CommandDispatcher {
    pub fn new(personas: Arc<PersonaCatalog>) -> Self {
        Self { personas }
    }

    /// Run `command`, returning the reply, or `None` for [`Command::Chat`].
    pub async fn execute(&self, command: Command, session: &mut Session) -> Option<String> {
        let reply = match command {
            Command::Chat => return None,
            Command::Help => HELP_TEXT.to_string(),
            Command::New => {
                session.reset();
                NEW_TEXT.to_string()
            }
            Command::PersonList => self.persona_list().await,
            Command::PersonSwitch(None) => PERSON_USAGE.to_string(),
            Command::PersonSwitch(Some(order)) => match self.personas.find_by_order(order).await {
                Some(persona) => {
                    session.switch_persona(&persona.id);
                    tracing::info!(
                        user_id = session.user_id,
                        persona = %persona.id,
                        "Switched persona"
                    );
                    format!("✅ 已切换到人格「{}」，对话已重置", persona.name)
                }
                None => format!("未找到序号 {order} 的人格，使用 /person_ls 查看列表"),
            },
        };
        Some(reply)
    }

    async fn persona_list(&self) -> String {
        let mut text = String::from("🎭 可用人格：");
        for persona in self.personas.list_sorted().await {
            let _ = write!(text, "\n{}. {}", persona.order, persona.name);
            if persona.is_default {
                text.push_str(" (默认)");
            }
        }
        text.push_str("\n\n使用 /person 序号 切换");
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Persona;
    use crate::session::SessionMessage;
    use crate::store::{MemoryStore, Store};

    #[test]
    fn parses_command_table() {
        assert_eq!(Command::parse("/help"), Command::Help);
        assert_eq!(Command::parse("/new"), Command::New);
        assert_eq!(Command::parse("/person_ls"), Command::PersonList);
        assert_eq!(Command::parse("/person 2"), Command::PersonSwitch(Some(2)));
        assert_eq!(Command::parse("/person   3  x"), Command::PersonSwitch(Some(3)));
        assert_eq!(Command::parse("/person"), Command::PersonSwitch(None));
        assert_eq!(Command::parse("/person abc"), Command::PersonSwitch(None));
    }

    #[test]
    fn non_commands_fall_through_to_chat() {
        assert_eq!(Command::parse("你好"), Command::Chat);
        assert_eq!(Command::parse("/weather 北京"), Command::Chat);
        assert_eq!(Command::parse("/helpme"), Command::Chat);
        assert_eq!(Command::parse("say /help"), Command::Chat);
    }

    async fn dispatcher() -> CommandDispatcher {
        let store = Arc::new(MemoryStore::default());
        store
            .save_personas(&[
                Persona {
                    id: "p2".into(),
                    order: 2,
                    name: "猫娘".into(),
                    prompt: "喵".into(),
                    is_default: false,
                },
                Persona {
                    id: "p1".into(),
                    order: 1,
                    name: "默认助手".into(),
                    prompt: "你好".into(),
                    is_default: true,
                },
            ])
            .await
            .unwrap();
        CommandDispatcher::new(Arc::new(PersonaCatalog::load(store).await.unwrap()))
    }

    fn session_with_history() -> Session {
        let mut session = Session::new(1, "p1");
        session.history.push(SessionMessage::user("hi"));
        session
    }

    #[tokio::test]
    async fn person_switch_resets_history() {
        let dispatcher = dispatcher().await;
        let mut session = session_with_history();

        let reply = dispatcher
            .execute(Command::PersonSwitch(Some(2)), &mut session)
            .await
            .unwrap();

        assert_eq!(reply, "✅ 已切换到人格「猫娘」，对话已重置");
        assert_eq!(session.persona_id, "p2");
        assert!(session.history.is_empty());
    }

    #[tokio::test]
    async fn unknown_order_leaves_session_unchanged() {
        let dispatcher = dispatcher().await;
        let mut session = session_with_history();
        let before = session.clone();

        let reply = dispatcher
            .execute(Command::PersonSwitch(Some(9)), &mut session)
            .await
            .unwrap();

        assert_eq!(reply, "未找到序号 9 的人格，使用 /person_ls 查看列表");
        assert_eq!(session, before);
    }

    #[tokio::test]
    async fn usage_and_list_replies() {
        let dispatcher = dispatcher().await;
        let mut session = session_with_history();

        let usage = dispatcher
            .execute(Command::PersonSwitch(None), &mut session)
            .await
            .unwrap();
        assert_eq!(usage, PERSON_USAGE);

        let list = dispatcher
            .execute(Command::PersonList, &mut session)
            .await
            .unwrap();
        assert_eq!(
            list,
            "🎭 可用人格：\n1. 默认助手 (默认)\n2. 猫娘\n\n使用 /person 序号 切换"
        );
        assert_eq!(session.history.len(), 1);
    }

    #[tokio::test]
    async fn new_keeps_persona() {
        let dispatcher = dispatcher().await;
        let mut session = session_with_history();
        session.persona_id = "p2".into();

        let reply = dispatcher.execute(Command::New, &mut session).await.unwrap();
        assert_eq!(reply, NEW_TEXT);
        assert!(session.history.is_empty());
        assert_eq!(session.persona_id, "p2");

        assert!(dispatcher
            .execute(Command::Chat, &mut session)
            .await
            .is_none());
        assert!(dispatcher
            .execute(Command::Help, &mut session)
            .await
            .unwrap()
            .contains("/person_ls"));
    }
}
