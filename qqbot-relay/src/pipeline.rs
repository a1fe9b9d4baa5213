//! Message pipeline.
//!
//! [`Relay`] owns every stateful component and turns one inbound gateway
//! event into outbound replies:
//!
//! 1. parse the event; anything but a private message is dropped
//! 2. queue it behind the user's earlier messages ([`Relay::dispatch`])
//! 3. roll stats over and refresh the user record
//! 4. lock the user's session for the rest of the turn
//! 5. answer slash commands directly
//! 6. otherwise append the user turn, compress if over the window, compose
//!    the prompt and ask the model
//! 7. deliver the reply in paced segments, then record history, stats and
//!    the user log
//!
//! Every failure stays local to the event.

use crate::commands::{Command, CommandDispatcher};
use crate::error::RelayError;
use crate::gateway::GatewayLink;
use crate::onebot::{parse_event, PrivateMessage, UserId};
use crate::persona::PersonaCatalog;
use crate::prompt;
use crate::provider::{ChatRequest, Provider};
use crate::segmenter::{self, Pacing};
use crate::session::{
    needs_compression, HistoryCompressor, MessageRole, SessionMessage, SessionRegistry,
};
use crate::stats::{self, StatsTracker};
use crate::store::Store;
use crate::users::UserDirectory;
use qqbot_common::config::ChatConfigUpdate;
use qqbot_common::logging::generate_trace_id;
use qqbot_common::util::truncate_with_ellipsis;
use dashmap::DashMap;
use qqbot_common::{ChatConfig, Error, Result, Validate};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, RwLock};
use tracing::Instrument;

/// Sent when the model cannot produce a reply.
pub const APOLOGY: &str = "抱歉，我暂时无法回复，请稍后再试。";

const LOG_PREVIEW_CHARS: usize = 50;

pub struct Relay {
    chat_config: RwLock<ChatConfig>,
    personas: Arc<PersonaCatalog>,
    sessions: SessionRegistry,
    commands: CommandDispatcher,
    compressor: HistoryCompressor,
    chat_provider: Arc<dyn Provider>,
    stats: StatsTracker,
    users: UserDirectory,
    gateway: Arc<GatewayLink>,
    store: Arc<dyn Store>,
    pacing: Pacing,
    /// Per-user inbound queues, drained in arrival order by one worker each
    queues: DashMap<UserId, mpsc::UnboundedSender<PrivateMessage>>,
}

impl Relay {
    /// Load persisted state from `store` and wire up the pipeline.
    ///
    /// `chat_provider` serves replies (usually retrying); `summary_provider`
    /// serves history summaries and should not retry.
    pub async fn load(
        store: Arc<dyn Store>,
        chat_provider: Arc<dyn Provider>,
        summary_provider: Arc<dyn Provider>,
        gateway: Arc<GatewayLink>,
    ) -> Result<Self> {
        let chat_config = match store.load_chat_config().await? {
            Some(config) => match config.validate() {
                Ok(()) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "Stored chat config invalid, using defaults");
                    ChatConfig::default()
                }
            },
            None => ChatConfig::default(),
        };

        let personas = Arc::new(PersonaCatalog::load(Arc::clone(&store)).await?);
        let stats = StatsTracker::load(Arc::clone(&store)).await?;
        let users = UserDirectory::load(Arc::clone(&store)).await?;

        tracing::info!(
            model = %chat_config.model,
            personas = personas.list().await.len(),
            "Relay loaded"
        );

        Ok(Self {
            chat_config: RwLock::new(chat_config),
            sessions: SessionRegistry::new(Arc::clone(&personas)),
            commands: CommandDispatcher::new(Arc::clone(&personas)),
            compressor: HistoryCompressor::new(summary_provider),
            personas,
            chat_provider,
            stats,
            users,
            gateway,
            store,
            pacing: Pacing::default(),
            queues: DashMap::new(),
        })
    }

    /// Override the delay between reply segments.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn gateway(&self) -> &Arc<GatewayLink> {
        &self.gateway
    }

    pub fn personas(&self) -> &Arc<PersonaCatalog> {
        &self.personas
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// Snapshot of the chat settings.
    pub async fn chat_config(&self) -> ChatConfig {
        self.chat_config.read().await.clone()
    }

    /// Apply a partial update, validate, persist, and publish it.
    ///
    /// Turns already in flight keep the snapshot they started with.
    pub async fn update_chat_config(&self, update: ChatConfigUpdate) -> Result<ChatConfig> {
        let mut current = self.chat_config.write().await;
        let next = current.merged(update);
        next.validate()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        self.store.save_chat_config(&next).await?;
        *current = next.clone();
        tracing::info!(model = %next.model, "Chat config updated");
        Ok(next)
    }

    // ========================================================================
    // Event Handling
    // ========================================================================

    /// Queue one raw frame from the gateway without waiting for the turn.
    ///
    /// Messages from the same user are handled one at a time in the order
    /// they were dispatched; different users proceed in parallel. Must be
    /// called from within a tokio runtime.
    pub fn dispatch(self: &Arc<Self>, raw: &str) {
        let Some(message) = Self::decode(raw) else {
            return;
        };
        let user_id = message.user_id;

        let mut queue = self
            .queues
            .entry(user_id)
            .or_insert_with(|| self.spawn_worker(user_id));
        if let Err(mpsc::error::SendError(message)) = queue.send(message) {
            // Worker exited; start a fresh one for this message.
            let fresh = self.spawn_worker(user_id);
            if fresh.send(message).is_err() {
                tracing::error!(user_id, "User queue closed, dropping message");
            }
            *queue = fresh;
        }
    }

    fn spawn_worker(self: &Arc<Self>, user_id: UserId) -> mpsc::UnboundedSender<PrivateMessage> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let relay: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let Some(relay) = relay.upgrade() else {
                    break;
                };
                relay.handle_message(message).await;
            }
            tracing::debug!(user_id, "User queue closed");
        });
        tx
    }

    /// Handle one raw frame from the gateway and wait for the turn to finish.
    pub async fn handle_raw(&self, raw: &str) {
        if let Some(message) = Self::decode(raw) {
            self.handle_message(message).await;
        }
    }

    fn decode(raw: &str) -> Option<PrivateMessage> {
        match parse_event(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    payload = %truncate_with_ellipsis(raw, 200),
                    "Discarding inbound event"
                );
                None
            }
        }
    }

    /// Handle one private message.
    pub async fn handle_message(&self, message: PrivateMessage) {
        let trace_id = generate_trace_id();
        let span = qqbot_common::channel_span!("qq", trace_id, message.user_id);
        self.process(message).instrument(span).await;
    }

    async fn process(&self, message: PrivateMessage) {
        let PrivateMessage {
            user_id,
            nickname,
            text,
        } = message;

        tracing::info!(
            nickname = %nickname,
            text = %truncate_with_ellipsis(&text, LOG_PREVIEW_CHARS),
            "Inbound message"
        );

        self.stats.check_rollover(stats::today()).await;
        self.users.touch(user_id, &nickname).await;

        if text.is_empty() {
            return;
        }

        let mut session = self.sessions.lock(user_id).await;

        if let Some(reply) = self
            .commands
            .execute(Command::parse(&text), &mut session)
            .await
        {
            self.deliver(user_id, &reply).await;
            return;
        }

        let config = self.chat_config().await;

        session.history.push(SessionMessage::user(text.as_str()));
        if needs_compression(&session.history, &config) {
            let history = std::mem::take(&mut session.history);
            session.history = self.compressor.compress(history, &config).await;
        }

        let request = ChatRequest {
            model: config.model.clone(),
            messages: prompt::compose(&session, &config, &self.personas).await,
            max_tokens: Some(config.max_tokens),
            temperature: Some(config.temperature),
        };

        let response = match self.chat_provider.chat(request).await {
            Ok(response) => response,
            Err(e) => {
                let err = RelayError::from(e);
                tracing::error!(error = %err, "Chat completion failed");
                if session
                    .history
                    .last()
                    .is_some_and(|m| m.role == MessageRole::User && m.content == text)
                {
                    session.history.pop();
                }
                self.deliver(user_id, APOLOGY).await;
                return;
            }
        };

        let reply = response.content;
        let tokens = response.usage.total();

        let segments = segmenter::plan(&reply, config.enable_stream);
        self.deliver_paced(user_id, &segments).await;

        session
            .history
            .push(SessionMessage::assistant(reply.as_str(), tokens));

        tracing::info!(
            tokens,
            segments = segments.len(),
            latency_ms = response.latency_ms,
            reply = %truncate_with_ellipsis(&reply, LOG_PREVIEW_CHARS),
            "Reply sent"
        );

        self.stats
            .record_exchange(stats::today(), user_id, &config.model, tokens)
            .await;
        self.users
            .record_exchange(user_id, &nickname, &text, &reply, tokens)
            .await;
    }

    async fn deliver_paced(&self, user_id: UserId, segments: &[String]) {
        for (i, segment) in segments.iter().enumerate() {
            self.deliver(user_id, segment).await;
            if i + 1 < segments.len() {
                let delay = self.pacing.next_delay();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn deliver(&self, user_id: UserId, text: &str) {
        if let Err(e) = self.gateway.send(user_id, text).await {
            tracing::warn!(error = %e, "Outbound message dropped");
        }
    }
}
