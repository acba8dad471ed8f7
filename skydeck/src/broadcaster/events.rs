//! WebSocket event frames
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.

use openapi_server::models::ProgressEvent;
use serde::{Deserialize, Serialize};

/// Frames sent by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientEvent {
    Subscribe(String),
    Unsubscribe(String),
}

/// Frames sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerEvent {
    Subscribed(String),
    Unsubscribed(String),
    Log(ProgressEvent),
}
