//! In-process broker
//!
//! Used by tests and by single-process setups where producer and consumer
//! share a runtime.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::broker::{prefix_stream, Broker, BrokerMessage, MessageStream};
use crate::errors::PlatformError;

pub struct MemoryBroker {
    tx: broadcast::Sender<BrokerMessage>,
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PlatformError> {
        // No subscribers is not an error, the message is simply dropped
        let _ = self.tx.send(BrokerMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe_prefix(&self, prefix: &str) -> Result<MessageStream, PlatformError> {
        Ok(prefix_stream(self.tx.subscribe(), prefix.to_string()))
    }
}
