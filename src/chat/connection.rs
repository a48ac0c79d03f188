//! Chat connection management
//!
//! Registry of live websocket connections across both chat surfaces. Each
//! connection owns an unbounded outbound queue; a writer task drains the
//! queue into the socket so handlers never block on a slow client.

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{stream::SplitSink, SinkExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use super::messages::ServerMessage;
use super::session::{Session, Surface};

/// Connection handle for sending messages
pub struct Connection {
    /// Session information
    pub session: Arc<RwLock<Session>>,
    /// Channel for sending messages to this connection
    tx: mpsc::UnboundedSender<ServerMessage>,
    /// Connection metadata
    remote_addr: Option<String>,
}

impl Connection {
    pub fn new(
        session: Session,
        remote_addr: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                session: Arc::new(RwLock::new(session)),
                tx,
                remote_addr,
            },
            rx,
        )
    }

    /// Queue a message for this connection
    pub fn send(&self, message: ServerMessage) -> Result<(), ConnectionError> {
        self.tx
            .send(message)
            .map_err(|_| ConnectionError::SendFailed)
    }

    /// Get connection id
    pub fn id(&self) -> String {
        self.session.read().id.clone()
    }

    /// Which surface the connection arrived on
    pub fn surface(&self) -> Surface {
        self.session.read().surface
    }

    /// The user behind the connection, if identified
    pub fn user_id(&self) -> Option<uuid::Uuid> {
        self.session.read().user_id()
    }

    /// Get remote address
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }
}

/// Connection manager
pub struct ConnectionManager {
    /// Active connections indexed by connection id
    connections: Arc<DashMap<String, Arc<Connection>>>,
    /// Connection statistics
    stats: Arc<RwLock<ConnectionStats>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            stats: Arc::new(RwLock::new(ConnectionStats::default())),
        }
    }

    /// Register a new connection
    pub fn register(
        &self,
        session: Session,
        remote_addr: Option<String>,
    ) -> (Arc<Connection>, mpsc::UnboundedReceiver<ServerMessage>) {
        let connection_id = session.id.clone();
        let surface = session.surface;
        let (connection, rx) = Connection::new(session, remote_addr);
        let connection = Arc::new(connection);

        self.connections
            .insert(connection_id.clone(), connection.clone());
        {
            let mut stats = self.stats.write();
            stats.total_connections += 1;
            stats.active_connections = self.connections.len() as u64;
        }

        info!(
            connection_id = %connection_id,
            surface = surface.label(),
            "Chat connection registered"
        );
        (connection, rx)
    }

    /// Unregister a connection. Returns false if it was already gone.
    pub fn unregister(&self, connection_id: &str) -> bool {
        if self.connections.remove(connection_id).is_some() {
            self.stats.write().active_connections = self.connections.len() as u64;
            info!(connection_id = %connection_id, "Chat connection unregistered");
            true
        } else {
            false
        }
    }

    /// Get connection by id
    pub fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(connection_id).map(|e| e.value().clone())
    }

    /// Number of active connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// All active connection ids
    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Queue a message for one connection by id
    pub fn send_to(
        &self,
        connection_id: &str,
        message: ServerMessage,
    ) -> Result<(), ConnectionError> {
        let connection = self.get(connection_id).ok_or(ConnectionError::NotFound)?;
        connection.send(message)
    }

    /// Queue a message for every connection on one surface. Used for
    /// presence transitions, which only the private surface subscribes to.
    pub fn send_to_surface(&self, surface: Surface, message: ServerMessage) -> usize {
        let mut delivered = 0;
        for entry in self.connections.iter() {
            let connection = entry.value();
            if connection.surface() != surface {
                continue;
            }
            if connection.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                crate::metrics::record_send_error();
            }
        }
        delivered
    }

    /// Fold one room broadcast into the running statistics
    pub fn record_broadcast(&self, delivered: u64) {
        let mut stats = self.stats.write();
        stats.total_events_broadcast += 1;
        stats.total_events_delivered += delivered;
    }

    /// Ids of sessions idle longer than the timeout
    pub fn expired_connection_ids(&self, timeout_secs: i64) -> Vec<String> {
        self.connections
            .iter()
            .filter(|entry| entry.value().session.read().is_expired(timeout_secs))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        self.stats.read().clone()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_events_broadcast: u64,
    pub total_events_delivered: u64,
}

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to send message to connection")]
    SendFailed,
    #[error("Connection not found")]
    NotFound,
}

/// WebSocket message writer
pub struct MessageWriter {
    sink: SplitSink<WebSocket, Message>,
}

impl MessageWriter {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }

    /// Send a server message as a JSON text frame
    pub async fn send(&mut self, message: ServerMessage) -> Result<(), std::io::Error> {
        let json = serde_json::to_string(&message)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        self.sink
            .send(Message::Text(json))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<(), std::io::Error> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use chrono::Utc;

    fn guest_session() -> Session {
        Session::new(Surface::Community, Identity::Guest)
    }

    #[test]
    fn test_connection_manager_creation() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.connection_count(), 0);
    }

    #[test]
    fn test_connection_registration() {
        let manager = ConnectionManager::new();
        let session = guest_session();
        let connection_id = session.id.clone();

        let (_conn, _rx) = manager.register(session, Some("127.0.0.1:8080".to_string()));
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.get(&connection_id).is_some());

        assert!(manager.unregister(&connection_id));
        assert_eq!(manager.connection_count(), 0);
        assert!(manager.get(&connection_id).is_none());

        // Double unregister is a no-op.
        assert!(!manager.unregister(&connection_id));
    }

    #[tokio::test]
    async fn test_connection_send() {
        let (conn, mut rx) = Connection::new(guest_session(), None);

        let message = ServerMessage::Welcome {
            connection_id: "test".to_string(),
            authenticated: false,
            server_time: Utc::now(),
            default_room: "main-chat".to_string(),
        };

        conn.send(message).unwrap();

        let received = rx.recv().await.unwrap();
        match received {
            ServerMessage::Welcome { connection_id, .. } => {
                assert_eq!(connection_id, "test");
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[tokio::test]
    async fn test_send_to_surface_targets_only_that_surface() {
        let manager = ConnectionManager::new();

        let (_community, mut community_rx) = manager.register(guest_session(), None);
        let private_session = Session::new(
            Surface::Private,
            Identity::Verified {
                user_id: uuid::Uuid::new_v4(),
                handle: "seahorse".to_string(),
            },
        );
        let (_private, mut private_rx) = manager.register(private_session, None);

        let delivered = manager.send_to_surface(
            Surface::Private,
            ServerMessage::UserStatusChanged {
                user_id: uuid::Uuid::new_v4(),
                is_online: true,
            },
        );

        assert_eq!(delivered, 1);
        assert!(private_rx.recv().await.is_some());
        assert!(community_rx.try_recv().is_err());
    }

    #[test]
    fn test_stats_tracking() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.stats().active_connections, 0);

        let session = guest_session();
        let connection_id = session.id.clone();
        let (_conn, _rx) = manager.register(session, None);

        let stats = manager.stats();
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.total_connections, 1);

        manager.record_broadcast(5);
        let stats = manager.stats();
        assert_eq!(stats.total_events_broadcast, 1);
        assert_eq!(stats.total_events_delivered, 5);

        manager.unregister(&connection_id);
        assert_eq!(manager.stats().active_connections, 0);
    }

    #[test]
    fn test_expired_connection_ids() {
        let manager = ConnectionManager::new();
        let session = guest_session();
        let connection_id = session.id.clone();
        let (conn, _rx) = manager.register(session, None);

        assert!(manager.expired_connection_ids(3600).is_empty());

        conn.session.write().last_active = Utc::now() - chrono::Duration::seconds(7200);
        assert_eq!(manager.expired_connection_ids(3600), vec![connection_id]);
    }
}
