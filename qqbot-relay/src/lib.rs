//! QQBot Relay - private-chat relay between a QQ gateway and an LLM.
//!
//! The gateway (a OneBot reverse WebSocket client such as NapCat) connects to
//! the relay and pushes message events. Private messages are answered by an
//! OpenAI-compatible model with a per-user conversation history, a
//! switchable persona prompt and human-paced delivery.
//!
//! ## Architecture
//!
//! ```text
//! QQ ←→ gateway ──ws──→ gateway::serve ──→ Relay ──→ Provider (LLM)
//!                             ↑               │
//!                             └── GatewayLink ←┘
//!
//! dashboard ──http──→ routes (stats, config, personas, users)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod commands;
pub mod error;
pub mod gateway;
pub mod onebot;
pub mod persona;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod routes;
pub mod segmenter;
pub mod session;
pub mod stats;
pub mod store;
pub mod users;

// Re-export commonly used types
pub use commands::{Command, CommandDispatcher};
pub use error::{RelayError, RelayResult};
pub use gateway::GatewayLink;
pub use onebot::{parse_event, OutboundAction, PrivateMessage, UserId};
pub use persona::{Persona, PersonaCatalog};
pub use pipeline::{Relay, APOLOGY};
pub use provider::{
    ChatMessage, ChatRequest, ChatResponse, OpenAiProvider, Provider, ProviderError,
    ResilienceConfig, ResilientProvider, TokenUsage,
};
pub use routes::{build_router, create_state, ApiState};
pub use segmenter::Pacing;
pub use session::{HistoryCompressor, Session, SessionMessage, SessionRegistry};
pub use stats::{StatsTracker, UsageStats};
pub use store::{JsonFileStore, MemoryStore, Store};
pub use users::{ChatUserRecord, UserDirectory};

use qqbot_common::config::Config;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Build the relay from service configuration: JSON store in the data
/// directory, OpenAI-compatible provider, fresh gateway link.
pub async fn build_relay(config: &Config) -> anyhow::Result<Arc<Relay>> {
    let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(config.data_dir()).await?);

    let base: Arc<dyn Provider> = Arc::new(OpenAiProvider::new(
        &config.llm.api_key,
        config.llm.base_url.clone(),
        Duration::from_secs(config.llm.request_timeout_secs),
    )?);
    let chat: Arc<dyn Provider> = Arc::new(ResilientProvider::new(
        Arc::clone(&base),
        ResilienceConfig::from_llm(&config.llm),
    ));

    if config.llm.api_key.is_empty() {
        tracing::warn!("OPENAI_API_KEY is not set; chat requests will likely fail");
    }

    let relay = Relay::load(store, chat, base, Arc::new(GatewayLink::new())).await?;
    Ok(Arc::new(relay))
}

/// Run the gateway socket server and the admin API until Ctrl-C.
pub async fn start_servers(config: &Config) -> anyhow::Result<()> {
    let host: IpAddr = config.network.bind.parse()?;
    let gateway_addr = SocketAddr::from((host, config.gateway_port()));
    let api_addr = SocketAddr::from((host, config.api_port()));

    let relay = build_relay(config).await?;

    let gateway_listener = tokio::net::TcpListener::bind(gateway_addr).await?;
    let api_listener = tokio::net::TcpListener::bind(api_addr).await?;

    let router = build_router(create_state(Arc::clone(&relay), config.llm.clone()));

    tracing::info!(gateway = %gateway_addr, api = %api_addr, "Starting QQBot Relay");

    let gateway_handle = tokio::spawn(gateway::serve(gateway_listener, Arc::clone(&relay)));

    axum::serve(api_listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    gateway_handle.abort();
    Ok(())
}
