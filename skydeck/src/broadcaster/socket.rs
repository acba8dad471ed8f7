//! WebSocket connections

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::broadcaster::events::ClientEvent;
use crate::broadcaster::registry::{ConnectionId, SubscriptionRegistry};

/// How often to ping the client
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long a client may go without answering a ping
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Serve one client until it disconnects or stops answering pings
pub async fn handle_socket(socket: WebSocket, registry: Arc<SubscriptionRegistry>) {
    let (id, mut outbox) = registry.register().await;
    info!("Client connected: {}", id);

    let (mut sender, mut receiver) = socket.split();

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await;
    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    warn!("Client {} stopped answering pings", id);
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            event = outbox.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode event for {}: {}", id, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&registry, id, text.as_str()).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Client {} socket error: {}", id, e);
                        break;
                    }
                }
            }
        }
    }

    registry.remove(id).await;
    let _ = sender.send(Message::Close(None)).await;
    info!("Client disconnected: {}", id);
}

/// Apply a subscribe or unsubscribe frame. Unknown frames are ignored.
pub async fn handle_client_frame(registry: &SubscriptionRegistry, id: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::Subscribe(topic)) => {
            info!("Client {} subscribed to {}", id, topic);
            registry.join(id, &topic).await;
        }
        Ok(ClientEvent::Unsubscribe(topic)) => {
            info!("Client {} unsubscribed from {}", id, topic);
            registry.leave(id, &topic).await;
        }
        Err(e) => warn!("Ignoring frame from {}: {}", id, e),
    }
}
