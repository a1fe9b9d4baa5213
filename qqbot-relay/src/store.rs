//! Persistence backends.
//!
//! The pipeline and admin API persist through [`Store`]. [`JsonFileStore`]
//! keeps one pretty-printed JSON document per collection in the data
//! directory; [`MemoryStore`] keeps everything in process.

use crate::onebot::UserId;
use crate::persona::Persona;
use crate::stats::UsageStats;
use crate::users::ChatUserRecord;
use async_trait::async_trait;
use qqbot_common::error::ResultExt;
use qqbot_common::{ChatConfig, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

const CHAT_FILE: &str = "chat.json";
const PERSONAS_FILE: &str = "personas.json";
const USERS_FILE: &str = "users.json";
const STATS_FILE: &str = "stats.json";

#[async_trait]
pub trait Store: Send + Sync {
    /// Stored chat settings, `None` when never saved.
    async fn load_chat_config(&self) -> Result<Option<ChatConfig>>;
    async fn save_chat_config(&self, config: &ChatConfig) -> Result<()>;

    async fn load_personas(&self) -> Result<Vec<Persona>>;
    async fn save_personas(&self, personas: &[Persona]) -> Result<()>;

    async fn load_stats(&self) -> Result<Option<UsageStats>>;
    async fn save_stats(&self, stats: &UsageStats) -> Result<()>;

    async fn load_users(&self) -> Result<Vec<ChatUserRecord>>;
    /// Insert or replace the record with the same user id.
    async fn upsert_user(&self, record: &ChatUserRecord) -> Result<()>;
}

// ============================================================================
// JSON Files
// ============================================================================

/// One JSON file per collection, replaced atomically on every write.
pub struct JsonFileStore {
    dir: PathBuf,
    /// Serializes writers; the users file is read-modify-write.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (and create if needed) the data directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .context(format!("creating {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), "Opened JSON store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .context(format!("parsing {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file, then rename over the target.
    async fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let bytes = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for JsonFileStore {
    async fn load_chat_config(&self) -> Result<Option<ChatConfig>> {
        self.read(CHAT_FILE).await
    }

    async fn save_chat_config(&self, config: &ChatConfig) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(CHAT_FILE, config).await
    }

    async fn load_personas(&self) -> Result<Vec<Persona>> {
        Ok(self.read(PERSONAS_FILE).await?.unwrap_or_default())
    }

    async fn save_personas(&self, personas: &[Persona]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(PERSONAS_FILE, personas).await
    }

    async fn load_stats(&self) -> Result<Option<UsageStats>> {
        self.read(STATS_FILE).await
    }

    async fn save_stats(&self, stats: &UsageStats) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(STATS_FILE, stats).await
    }

    async fn load_users(&self) -> Result<Vec<ChatUserRecord>> {
        let users: BTreeMap<UserId, ChatUserRecord> =
            self.read(USERS_FILE).await?.unwrap_or_default();
        Ok(users.into_values().collect())
    }

    async fn upsert_user(&self, record: &ChatUserRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut users: BTreeMap<UserId, ChatUserRecord> =
            self.read(USERS_FILE).await?.unwrap_or_default();
        users.insert(record.user_id, record.clone());
        self.write(USERS_FILE, &users).await
    }
}

// ============================================================================
// In Memory
// ============================================================================

/// Process-local store for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    chat: RwLock<Option<ChatConfig>>,
    personas: RwLock<Vec<Persona>>,
    stats: RwLock<Option<UsageStats>>,
    users: RwLock<BTreeMap<UserId, ChatUserRecord>>,
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_chat_config(&self) -> Result<Option<ChatConfig>> {
        Ok(self.chat.read().await.clone())
    }

    async fn save_chat_config(&self, config: &ChatConfig) -> Result<()> {
        *self.chat.write().await = Some(config.clone());
        Ok(())
    }

    async fn load_personas(&self) -> Result<Vec<Persona>> {
        Ok(self.personas.read().await.clone())
    }

    async fn save_personas(&self, personas: &[Persona]) -> Result<()> {
        *self.personas.write().await = personas.to_vec();
        Ok(())
    }

    async fn load_stats(&self) -> Result<Option<UsageStats>> {
        Ok(self.stats.read().await.clone())
    }

    async fn save_stats(&self, stats: &UsageStats) -> Result<()> {
        *self.stats.write().await = Some(stats.clone());
        Ok(())
    }

    async fn load_users(&self) -> Result<Vec<ChatUserRecord>> {
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn upsert_user(&self, record: &ChatUserRecord) -> Result<()> {
        self.users
            .write()
            .await
            .insert(record.user_id, record.clone());
        Ok(())
    }
}
