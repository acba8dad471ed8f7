//! Build progress reporting

use std::sync::Arc;

use openapi_server::models::ProgressEvent;
use tracing::{info, warn};

use crate::broker::topics::Topics;
use crate::broker::Broker;

/// Publishes progress messages on a deployment's log topic
#[derive(Clone)]
pub struct ProgressPublisher {
    broker: Arc<dyn Broker>,
    topic: String,
}

impl ProgressPublisher {
    pub fn new(broker: Arc<dyn Broker>, slug: &str) -> Self {
        Self {
            broker,
            topic: Topics::logs(slug),
        }
    }

    /// Publish one message. A broker failure is logged and does not stop the build.
    pub async fn publish(&self, message: impl Into<String>) {
        let event = ProgressEvent {
            message: clamp(message.into()),
        };
        info!(topic = %self.topic, "{}", event.message);

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode progress event: {}", e);
                return;
            }
        };
        if let Err(e) = self.broker.publish(&self.topic, payload).await {
            warn!("Failed to publish progress on {}: {}", self.topic, e);
        }
    }

    /// Publish an error line
    pub async fn error(&self, detail: impl std::fmt::Display) {
        self.publish(format!("{}{}", ERROR_PREFIX, detail)).await;
    }
}

/// Prefix on messages that report failures and stderr output
pub const ERROR_PREFIX: &str = "error occurred - ";

/// Longest message published as-is. JSON escaping can grow a message up to
/// six times, which keeps every event under the broker packet limit.
pub const MAX_MESSAGE_BYTES: usize = 128 * 1024;

const TRUNCATED: &str = " [truncated]";

/// Cut an oversized message on a char boundary
fn clamp(mut message: String) -> String {
    if message.len() <= MAX_MESSAGE_BYTES {
        return message;
    }
    let mut end = MAX_MESSAGE_BYTES - TRUNCATED.len();
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message.truncate(end);
    message.push_str(TRUNCATED);
    message
}
