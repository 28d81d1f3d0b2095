//! Persistent connection registry.
//!
//! Every registered connection is authenticated: a connection whose
//! credential fails validation is closed before it is ever registered.
//! Notifications are fanned out with `try_send`, so a slow or dead
//! connection never holds up delivery to the others.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::Frame;
use crate::server::auth::Identity;
use crate::server::metrics;

/// Outgoing frames buffered per connection.
pub const OUTGOING_BUFFER: usize = 32;

struct ConnectionEntry {
    sender: mpsc::Sender<Frame>,
    identity: Identity,
    subscribed: bool,
    subscriber_id: Option<String>,
}

/// Error type for send operations.
#[derive(Debug, Clone, PartialEq)]
pub enum SendError {
    /// No connection with that id.
    NotConnected,
    /// The connection channel is closed.
    Disconnected,
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

pub struct ConnectionManager {
    /// connection_id -> entry
    connections: RwLock<HashMap<String, ConnectionEntry>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Registers an authenticated connection.
    ///
    /// Returns the sender used for direct replies and the receiver the
    /// caller forwards to the socket.
    pub async fn register(
        &self,
        connection_id: &str,
        identity: Identity,
    ) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(OUTGOING_BUFFER);

        let mut conns = self.connections.write().await;
        conns.insert(
            connection_id.to_string(),
            ConnectionEntry {
                sender: tx.clone(),
                identity,
                subscribed: false,
                subscriber_id: None,
            },
        );
        metrics::set_active_connections(conns.len());

        (tx, rx)
    }

    pub async fn unregister(&self, connection_id: &str) {
        let mut conns = self.connections.write().await;
        conns.remove(connection_id);
        metrics::set_active_connections(conns.len());
    }

    /// Marks a connection as a broadcast subscriber, optionally under an id
    /// used for targeted delivery. Returns false if the connection is gone.
    pub async fn subscribe(&self, connection_id: &str, subscriber_id: Option<String>) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get_mut(connection_id) {
            Some(entry) => {
                entry.subscribed = true;
                if subscriber_id.is_some() {
                    entry.subscriber_id = subscriber_id;
                }
                true
            }
            None => false,
        }
    }

    pub async fn send_to(&self, connection_id: &str, frame: Frame) -> Result<(), SendError> {
        let sender = {
            let conns = self.connections.read().await;
            match conns.get(connection_id) {
                Some(entry) => entry.sender.clone(),
                None => return Err(SendError::NotConnected),
            }
        };
        sender.send(frame).await.map_err(|_| SendError::Disconnected)
    }

    fn fan_out<'a>(
        entries: impl Iterator<Item = &'a ConnectionEntry>,
        frame: &Frame,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for entry in entries {
            match entry.sender.try_send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }
        metrics::record_broadcast(report.delivered, report.failed);
        report
    }

    /// Sends `frame` to every authenticated connection.
    pub async fn broadcast(&self, frame: Frame) -> DeliveryReport {
        let conns = self.connections.read().await;
        Self::fan_out(conns.values(), &frame)
    }

    /// Sends `frame` to the connections subscribed under `subscriber_id`.
    pub async fn publish(&self, subscriber_id: &str, frame: Frame) -> DeliveryReport {
        let conns = self.connections.read().await;
        Self::fan_out(
            conns.values().filter(|entry| {
                entry.subscribed && entry.subscriber_id.as_deref() == Some(subscriber_id)
            }),
            &frame,
        )
    }

    pub async fn total_connections(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|entry| entry.subscribed)
            .count()
    }

    /// Identity of a connection, if it is registered.
    pub async fn identity_of(&self, connection_id: &str) -> Option<Identity> {
        self.connections
            .read()
            .await
            .get(connection_id)
            .map(|entry| entry.identity.clone())
    }
}
