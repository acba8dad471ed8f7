//! Message broker access
//!
//! Producers publish raw payloads on a topic; consumers subscribe to every
//! topic sharing a prefix and receive a lazy stream of messages. Messages on
//! one topic are yielded in the order the broker delivered them.

pub mod memory;
pub mod mqtt;
pub mod topics;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::warn;

use crate::errors::PlatformError;

/// A message received from the broker
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    /// Parse payload as JSON
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, PlatformError> {
        serde_json::from_slice(&self.payload).map_err(|e| PlatformError::BrokerError(e.to_string()))
    }
}

/// Stream of messages matching a subscription
pub type MessageStream = BoxStream<'static, BrokerMessage>;

/// Topic based publish/subscribe
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload on a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PlatformError>;

    /// Subscribe to every topic starting with `prefix`
    async fn subscribe_prefix(&self, prefix: &str) -> Result<MessageStream, PlatformError>;

    /// Flush pending publishes and release the connection
    async fn close(&self) -> Result<(), PlatformError> {
        Ok(())
    }
}

/// Adapt a broadcast receiver of every incoming message into a stream of the
/// messages whose topic starts with `prefix`
pub(crate) fn prefix_stream(
    rx: broadcast::Receiver<BrokerMessage>,
    prefix: String,
) -> MessageStream {
    stream::unfold((rx, prefix), |(mut rx, prefix)| async move {
        loop {
            match rx.recv().await {
                Ok(msg) if msg.topic.starts_with(&prefix) => return Some((msg, (rx, prefix))),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscriber for '{}' lagged, {} messages skipped", prefix, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
