//! Broker to WebSocket relay

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use openapi_server::models::ProgressEvent;
use tracing::{debug, info, warn};

use crate::broadcaster::events::ServerEvent;
use crate::broadcaster::registry::SubscriptionRegistry;
use crate::broker::topics::Topics;
use crate::broker::{BrokerMessage, MessageStream};

/// Fan one broker message out to the connections joined to its topic.
/// Returns `None` when the message is not a progress event for a deployment.
pub async fn handle_message(
    registry: &SubscriptionRegistry,
    message: &BrokerMessage,
) -> Option<usize> {
    if !Topics::is_log_topic(&message.topic) {
        debug!("Ignoring message on {}", message.topic);
        return None;
    }
    let event: ProgressEvent = match message.parse_json() {
        Ok(event) => event,
        Err(e) => {
            warn!("Dropping malformed message on {}: {}", message.topic, e);
            return None;
        }
    };
    let delivered = registry
        .deliver(&message.topic, &ServerEvent::Log(event))
        .await;
    debug!("Relayed message on {} to {} connection(s)", message.topic, delivered);
    Some(delivered)
}

/// Relay every message of `stream` until it ends or shutdown is signalled
pub async fn run(
    mut stream: MessageStream,
    registry: Arc<SubscriptionRegistry>,
    shutdown_signal: impl Future<Output = ()> + Send,
) {
    tokio::pin!(shutdown_signal);
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Relay shutting down");
                return;
            }
            message = stream.next() => match message {
                Some(message) => {
                    handle_message(&registry, &message).await;
                }
                None => {
                    warn!("Broker subscription ended");
                    return;
                }
            }
        }
    }
}
