//! In-process registry of live client connections, keyed by user id.
//!
//! Each connection is the sending half of an unbounded channel; the socket
//! task owns the receiving half and forwards frames to the client. A send
//! fails only once that task is gone, so a failed send is treated as a dead
//! connection and pruned. Delivery is best effort: nothing is queued for
//! users without connections and nothing is retried.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::ride::RideView;

pub type ConnectionId = Uuid;

/// Messages the server sends over the real-time channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected { message: String },
    RideUpdate { data: RideView },
    Pong,
    Error { message: String },
}

impl ServerEvent {
    pub fn to_json(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!("dropping unserializable event: {err}");
                None
            }
        }
    }
}

/// Push-capable handle for one client connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<String>,
}

impl Connection {
    /// New handle plus the receiver the socket writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn downgrade(&self) -> mpsc::WeakUnboundedSender<String> {
        self.tx.downgrade()
    }

    fn send(&self, text: &str) -> bool {
        self.tx.send(text.to_owned()).is_ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub users: usize,
    pub connections: usize,
    pub pruned: u64,
}

type ConnectionMap = HashMap<String, HashMap<ConnectionId, Connection>>;

#[derive(Clone, Default)]
pub struct NotificationRegistry {
    connections: Arc<RwLock<ConnectionMap>>,
    pruned: Arc<AtomicU64>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self, user_id: &str, connection: Connection) -> ConnectionId {
        let id = connection.id;
        let mut map = self.connections.write().await;
        map.entry(user_id.to_owned())
            .or_default()
            .insert(id, connection);
        debug!(user_id, connection = %id, "connection registered");
        id
    }

    pub async fn disconnect(&self, user_id: &str, connection_id: ConnectionId) {
        let mut map = self.connections.write().await;
        Self::remove_locked(&mut map, user_id, connection_id);
        debug!(user_id, connection = %connection_id, "connection removed");
    }

    /// Sends `event` to every connection of `user_id` and returns how many
    /// accepted it. Dead connections are pruned; failures never surface.
    pub async fn push(&self, user_id: &str, event: &ServerEvent) -> usize {
        let Some(text) = event.to_json() else {
            return 0;
        };

        let targets: Vec<Connection> = {
            let map = self.connections.read().await;
            match map.get(user_id) {
                Some(conns) => conns.values().cloned().collect(),
                None => return 0,
            }
        };

        let (delivered, dead) = Self::deliver(&targets, &text);
        if !dead.is_empty() {
            let mut map = self.connections.write().await;
            for id in &dead {
                Self::remove_locked(&mut map, user_id, *id);
            }
            self.record_pruned(user_id, dead.len());
        }
        delivered
    }

    /// Sends `event` to every registered connection of every user.
    pub async fn broadcast(&self, event: &ServerEvent) -> usize {
        let Some(text) = event.to_json() else {
            return 0;
        };

        let targets: Vec<(String, Vec<Connection>)> = {
            let map = self.connections.read().await;
            map.iter()
                .map(|(user, conns)| (user.clone(), conns.values().cloned().collect()))
                .collect()
        };

        let mut delivered = 0;
        let mut dead_by_user = Vec::new();
        for (user_id, conns) in targets {
            let (ok, dead) = Self::deliver(&conns, &text);
            delivered += ok;
            if !dead.is_empty() {
                dead_by_user.push((user_id, dead));
            }
        }

        if !dead_by_user.is_empty() {
            let mut map = self.connections.write().await;
            for (user_id, dead) in &dead_by_user {
                for id in dead {
                    Self::remove_locked(&mut map, user_id, *id);
                }
                self.record_pruned(user_id, dead.len());
            }
        }
        delivered
    }

    /// Drops every registered sender so socket writers wind down.
    pub async fn shutdown(&self) {
        let mut map = self.connections.write().await;
        let count: usize = map.values().map(HashMap::len).sum();
        map.clear();
        debug!(count, "notification registry cleared");
    }

    pub async fn stats(&self) -> RegistryStats {
        let map = self.connections.read().await;
        RegistryStats {
            users: map.len(),
            connections: map.values().map(HashMap::len).sum(),
            pruned: self.pruned.load(Ordering::Relaxed),
        }
    }

    pub async fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .read()
            .await
            .get(user_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    fn deliver(targets: &[Connection], text: &str) -> (usize, Vec<ConnectionId>) {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for conn in targets {
            if conn.send(text) {
                delivered += 1;
            } else {
                dead.push(conn.id);
            }
        }
        (delivered, dead)
    }

    fn remove_locked(map: &mut ConnectionMap, user_id: &str, connection_id: ConnectionId) {
        if let Some(conns) = map.get_mut(user_id) {
            conns.remove(&connection_id);
            if conns.is_empty() {
                map.remove(user_id);
            }
        }
    }

    fn record_pruned(&self, user_id: &str, count: usize) {
        self.pruned.fetch_add(count as u64, Ordering::Relaxed);
        warn!(user_id, count, "pruned dead connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong() -> ServerEvent {
        ServerEvent::Pong
    }

    #[tokio::test]
    async fn push_prunes_dead_connections_and_keeps_live_ones() {
        let registry = NotificationRegistry::new();
        let (live, mut live_rx) = Connection::channel();
        let (dead, dead_rx) = Connection::channel();
        registry.connect("u1", live).await;
        registry.connect("u1", dead).await;
        drop(dead_rx);

        assert_eq!(registry.push("u1", &pong()).await, 1);
        assert_eq!(live_rx.try_recv().unwrap(), r#"{"type":"pong"}"#);
        assert!(live_rx.try_recv().is_err());
        assert_eq!(registry.connection_count("u1").await, 1);
        assert_eq!(registry.stats().await.pruned, 1);

        assert_eq!(registry.push("u1", &pong()).await, 1);
        assert!(live_rx.try_recv().is_ok());
        assert!(live_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnecting_the_last_connection_drops_the_user() {
        let registry = NotificationRegistry::new();
        let (a, _a_rx) = Connection::channel();
        let (b, _b_rx) = Connection::channel();
        let a_id = registry.connect("u1", a).await;
        let b_id = registry.connect("u1", b).await;

        registry.disconnect("u1", a_id).await;
        assert_eq!(registry.stats().await.users, 1);
        registry.disconnect("u1", b_id).await;
        assert_eq!(registry.stats().await, RegistryStats::default());
    }

    #[tokio::test]
    async fn push_to_unknown_user_is_a_noop() {
        let registry = NotificationRegistry::new();
        assert_eq!(registry.push("nobody", &pong()).await, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_and_prunes() {
        let registry = NotificationRegistry::new();
        let (a, mut a_rx) = Connection::channel();
        let (b, mut b_rx) = Connection::channel();
        let (c, c_rx) = Connection::channel();
        registry.connect("u1", a).await;
        registry.connect("u2", b).await;
        registry.connect("u3", c).await;
        drop(c_rx);

        let event = ServerEvent::Error {
            message: "maintenance".into(),
        };
        assert_eq!(registry.broadcast(&event).await, 2);
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());

        let stats = registry.stats().await;
        assert_eq!(stats.users, 2);
        assert_eq!(stats.connections, 2);
    }

    #[tokio::test]
    async fn shutdown_closes_receivers() {
        let registry = NotificationRegistry::new();
        let (a, mut a_rx) = Connection::channel();
        registry.connect("u1", a).await;
        registry.shutdown().await;
        assert!(a_rx.recv().await.is_none());
    }
}
