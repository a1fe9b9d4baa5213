//! Durable per-user chat records.

use crate::onebot::UserId;
use crate::session::MessageRole;
use crate::store::Store;
use chrono::{DateTime, Local, Utc};
use qqbot_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Upper bound of [`ChatUserRecord::messages`]; oldest entries go first.
pub const MAX_MESSAGE_LOG: usize = 200;

/// One entry of a user's chat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessageLog {
    pub id: i64,
    pub role: MessageRole,
    pub content: String,
    /// Local wall clock, `HH:MM`
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUserRecord {
    pub user_id: UserId,
    pub nickname: String,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub token_count: u64,
    #[serde(default)]
    pub last_chat_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<UserMessageLog>,
}

impl ChatUserRecord {
    pub fn new(user_id: UserId, nickname: impl Into<String>) -> Self {
        Self {
            user_id,
            nickname: nickname.into(),
            message_count: 0,
            token_count: 0,
            last_chat_time: None,
            messages: Vec::new(),
        }
    }

    /// Record a completed exchange and cap the log.
    pub fn record_exchange(&mut self, question: &str, reply: &str, tokens: u64, now: DateTime<Utc>) {
        self.message_count += 1;
        self.token_count += tokens;
        self.last_chat_time = Some(now);

        let id = now.timestamp_millis();
        let time = now.with_timezone(&Local).format("%H:%M").to_string();
        self.messages.push(UserMessageLog {
            id,
            role: MessageRole::User,
            content: question.to_string(),
            time: time.clone(),
            tokens: None,
        });
        self.messages.push(UserMessageLog {
            id: id + 1,
            role: MessageRole::Assistant,
            content: reply.to_string(),
            time,
            tokens: Some(tokens),
        });

        if self.messages.len() > MAX_MESSAGE_LOG {
            let excess = self.messages.len() - MAX_MESSAGE_LOG;
            self.messages.drain(..excess);
        }
    }
}

/// In-memory view of all user records, written through to the store.
pub struct UserDirectory {
    users: RwLock<HashMap<UserId, ChatUserRecord>>,
    store: Arc<dyn Store>,
}

impl UserDirectory {
    pub async fn load(store: Arc<dyn Store>) -> Result<Self> {
        let users = store
            .load_users()
            .await?
            .into_iter()
            .map(|record| (record.user_id, record))
            .collect();
        Ok(Self {
            users: RwLock::new(users),
            store,
        })
    }

    /// Ensure a record exists and carries the latest nickname.
    pub async fn touch(&self, user_id: UserId, nickname: &str) {
        let changed = {
            let mut users = self.users.write().await;
            match users.get_mut(&user_id) {
                Some(record) if record.nickname == nickname => None,
                Some(record) => {
                    record.nickname = nickname.to_string();
                    Some(record.clone())
                }
                None => {
                    let record = ChatUserRecord::new(user_id, nickname);
                    users.insert(user_id, record.clone());
                    Some(record)
                }
            }
        };
        if let Some(record) = changed {
            self.persist(&record).await;
        }
    }

    /// Append an exchange to the user's record and persist it.
    pub async fn record_exchange(
        &self,
        user_id: UserId,
        nickname: &str,
        question: &str,
        reply: &str,
        tokens: u64,
    ) {
        let record = {
            let mut users = self.users.write().await;
            let record = users
                .entry(user_id)
                .or_insert_with(|| ChatUserRecord::new(user_id, nickname));
            record.record_exchange(question, reply, tokens, Utc::now());
            record.clone()
        };
        self.persist(&record).await;
    }

    pub async fn get(&self, user_id: UserId) -> Option<ChatUserRecord> {
        self.users.read().await.get(&user_id).cloned()
    }

    /// All records, most recent chat first; users who never chatted last.
    pub async fn list(&self) -> Vec<ChatUserRecord> {
        let mut records: Vec<_> = self.users.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            b.last_chat_time
                .cmp(&a.last_chat_time)
                .then(a.user_id.cmp(&b.user_id))
        });
        records
    }

    /// Top `limit` users by message count.
    pub async fn ranking(&self, limit: usize) -> Vec<ChatUserRecord> {
        let mut records: Vec<_> = self.users.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            b.message_count
                .cmp(&a.message_count)
                .then(a.user_id.cmp(&b.user_id))
        });
        records.truncate(limit);
        records
    }

    async fn persist(&self, record: &ChatUserRecord) {
        if let Err(e) = self.store.upsert_user(record).await {
            tracing::error!(user_id = record.user_id, error = %e, "Failed to save user record");
        }
    }
}
