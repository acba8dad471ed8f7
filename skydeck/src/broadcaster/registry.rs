//! Topic subscriptions
//!
//! Tracks which connection has joined which topic. Each connection owns an
//! unbounded outbox; membership changes take the write lock and delivery the
//! read lock, so a connection sees a topic's events in publish order and never
//! after it has left.

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::broadcaster::events::ServerEvent;

pub type ConnectionId = Uuid;

struct Connection {
    outbox: mpsc::UnboundedSender<ServerEvent>,
    topics: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    groups: HashMap<String, HashSet<ConnectionId>>,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and return its id and outbox
    pub async fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.connections.insert(
            id,
            Connection {
                outbox: tx,
                topics: HashSet::new(),
            },
        );
        debug!("Connection {} registered", id);
        (id, rx)
    }

    /// Join `topic` and acknowledge it. Joining twice is acknowledged again.
    /// Returns false for unknown connections.
    pub async fn join(&self, id: ConnectionId, topic: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(connection) = inner.connections.get_mut(&id) else {
            return false;
        };
        connection.topics.insert(topic.to_string());
        let _ = connection
            .outbox
            .send(ServerEvent::Subscribed(topic.to_string()));
        inner
            .groups
            .entry(topic.to_string())
            .or_default()
            .insert(id);
        debug!("Connection {} joined {}", id, topic);
        true
    }

    /// Leave `topic` and acknowledge it. Returns false for unknown connections.
    pub async fn leave(&self, id: ConnectionId, topic: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(connection) = inner.connections.get_mut(&id) else {
            return false;
        };
        connection.topics.remove(topic);
        let _ = connection
            .outbox
            .send(ServerEvent::Unsubscribed(topic.to_string()));
        Self::drop_member(&mut inner.groups, topic, id);
        debug!("Connection {} left {}", id, topic);
        true
    }

    /// Forget a connection and all its memberships
    pub async fn remove(&self, id: ConnectionId) {
        let mut inner = self.inner.write().await;
        if let Some(connection) = inner.connections.remove(&id) {
            for topic in &connection.topics {
                Self::drop_member(&mut inner.groups, topic, id);
            }
            debug!("Connection {} removed", id);
        }
    }

    /// Queue `event` for every connection joined to `topic`, returning how
    /// many connections it was queued for
    pub async fn deliver(&self, topic: &str, event: &ServerEvent) -> usize {
        let inner = self.inner.read().await;
        let Some(members) = inner.groups.get(topic) else {
            return 0;
        };
        members
            .iter()
            .filter_map(|id| inner.connections.get(id))
            .filter(|connection| connection.outbox.send(event.clone()).is_ok())
            .count()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    pub async fn member_count(&self, topic: &str) -> usize {
        self.inner
            .read()
            .await
            .groups
            .get(topic)
            .map_or(0, HashSet::len)
    }

    fn drop_member(
        groups: &mut HashMap<String, HashSet<ConnectionId>>,
        topic: &str,
        id: ConnectionId,
    ) {
        if let Some(members) = groups.get_mut(topic) {
            members.remove(&id);
            if members.is_empty() {
                groups.remove(topic);
            }
        }
    }
}
