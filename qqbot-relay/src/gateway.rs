//! Gateway connection.
//!
//! The IM gateway (a OneBot reverse WebSocket client) connects to us. At most
//! one connection is active: a new connection replaces the previous one for
//! outbound traffic. Inbound text frames are queued per user, so one user's
//! messages keep their order while different users are served in parallel.

use crate::error::{RelayError, RelayResult};
use crate::onebot::{OutboundAction, UserId};
use crate::pipeline::Relay;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

struct Connection {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Handle to the current gateway connection.
#[derive(Default)]
pub struct GatewayLink {
    current: RwLock<Option<Connection>>,
    next_id: AtomicU64,
}

impl GatewayLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, replacing any previous one.
    ///
    /// Returns the connection id and the queue of outbound frames to write.
    pub async fn attach(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self.current.write().await.replace(Connection { id, tx });
        if let Some(previous) = previous {
            tracing::info!(old = previous.id, new = id, "Gateway connection replaced");
        }
        (id, rx)
    }

    /// Forget connection `id` if it is still the current one.
    pub async fn detach(&self, id: u64) -> bool {
        let mut current = self.current.write().await;
        if current.as_ref().is_some_and(|c| c.id == id) {
            *current = None;
            true
        } else {
            false
        }
    }

    pub async fn is_online(&self) -> bool {
        self.current
            .read()
            .await
            .as_ref()
            .is_some_and(|c| !c.tx.is_closed())
    }

    /// Queue a private message. Fire-and-forget: delivery is not confirmed.
    pub async fn send(&self, user_id: UserId, message: &str) -> RelayResult<()> {
        let frame = OutboundAction::send_private_msg(user_id, message).to_frame()?;
        let current = self.current.read().await;
        let connection = current.as_ref().ok_or(RelayError::TransportUnavailable)?;
        connection
            .tx
            .send(frame)
            .map_err(|_| RelayError::TransportUnavailable)
    }
}

// ============================================================================
// Socket Server
// ============================================================================

/// Accept gateway connections on `listener` until the task is dropped.
pub async fn serve(listener: TcpListener, relay: Arc<Relay>) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Gateway socket listening");
    }

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let relay = Arc::clone(&relay);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, relay).await {
                        tracing::warn!(%peer, error = %e, "Gateway connection error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to accept gateway connection");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    relay: Arc<Relay>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let link = Arc::clone(relay.gateway());
    let (id, mut outbound) = link.attach().await;
    tracing::info!(%peer, connection = id, "Gateway connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(frame)).await {
                tracing::warn!(connection = id, error = %e, "Gateway write failed");
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => relay.dispatch(&text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(connection = id, error = %e, "Gateway read failed");
                break;
            }
        }
    }

    if link.detach(id).await {
        tracing::info!(%peer, connection = id, "Gateway disconnected");
    }
    writer.abort();
    Ok(())
}
