//! WebSocket connection manager.
//!
//! Tracks active connections per document and fans logged patches out to
//! every connection attached to the same document.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Document the connection is attached to
    pub doc_id: String,
    /// Client's node ID, recorded against the patches it pushes
    pub node_id: String,
    pub sender: MessageSender,
}

/// Manages active WebSocket connections.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
    /// Connection IDs attached to each document.
    by_doc_id: DashMap<String, Vec<String>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a connection on `doc_id`. Returns the connection ID.
    pub fn register(&self, doc_id: String, node_id: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.by_doc_id
            .entry(doc_id.clone())
            .or_default()
            .push(conn_id.clone());

        self.connections.insert(
            conn_id.clone(),
            Connection {
                doc_id,
                node_id,
                sender,
            },
        );

        conn_id
    }

    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            if let Some(mut conn_ids) = self.by_doc_id.get_mut(&conn.doc_id) {
                conn_ids.retain(|id| id != conn_id);
                if conn_ids.is_empty() {
                    drop(conn_ids);
                    self.by_doc_id.remove(&conn.doc_id);
                }
            }

            tracing::info!(
                conn_id = %conn_id,
                doc_id = %conn.doc_id,
                "WebSocket connection unregistered"
            );
        }
    }

    /// Send `message` to every connection on `doc_id` except `sender_conn_id`.
    ///
    /// Pass `None` to reach every connection, e.g. for pushes that arrived
    /// over HTTP. Returns the number of connections that received it.
    pub fn broadcast_except(
        &self,
        doc_id: &str,
        sender_conn_id: Option<&str>,
        message: ServerMessage,
    ) -> usize {
        let targets: Vec<String> = match self.by_doc_id.get(doc_id) {
            Some(ids) => ids.value().clone(),
            None => return 0,
        };

        let mut sent_count = 0;
        for conn_id in targets {
            if Some(conn_id.as_str()) == sender_conn_id {
                continue;
            }
            if self.send_to(&conn_id, message.clone()) {
                sent_count += 1;
            }
        }

        tracing::debug!(
            doc_id = %doc_id,
            recipients = sent_count,
            "Broadcast message to connections"
        );

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Node ID a connection registered with.
    pub fn node_id(&self, conn_id: &str) -> Option<String> {
        self.connections
            .get(conn_id)
            .map(|conn| conn.node_id.clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Whether any live connection is attached to `doc_id`.
    pub fn has_connections(&self, doc_id: &str) -> bool {
        self.by_doc_id.contains_key(doc_id)
    }

    /// Number of documents with at least one live connection.
    pub fn document_count(&self) -> usize {
        self.by_doc_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register("doc-1".to_string(), "node-1".to_string(), tx);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.document_count(), 1);

        assert_eq!(manager.node_id(&conn_id).as_deref(), Some("node-1"));
        assert!(manager.has_connections("doc-1"));

        manager.unregister(&conn_id);
        assert!(!manager.has_connections("doc-1"));
        assert!(manager.node_id(&conn_id).is_none());
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.document_count(), 0);
    }

    #[test]
    fn test_broadcast_stays_within_document() {
        let manager = ConnectionManager::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        let conn1 = manager.register("doc-1".to_string(), "node-1".to_string(), tx1);
        let _conn2 = manager.register("doc-1".to_string(), "node-2".to_string(), tx2);
        let _conn3 = manager.register("doc-2".to_string(), "node-3".to_string(), tx3);

        let sent = manager.broadcast_except("doc-1", Some(&conn1), ServerMessage::Pong);
        assert_eq!(sent, 1);

        assert!(rx1.try_recv().is_err());
        assert!(matches!(rx2.try_recv().unwrap(), ServerMessage::Pong));
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_without_sender_reaches_everyone() {
        let manager = ConnectionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        manager.register("doc-1".to_string(), "node-1".to_string(), tx1);
        manager.register("doc-1".to_string(), "node-2".to_string(), tx2);

        assert_eq!(manager.broadcast_except("doc-1", None, ServerMessage::Pong), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert_eq!(manager.broadcast_except("doc-9", None, ServerMessage::Pong), 0);
    }

    #[test]
    fn test_closed_receiver_is_not_counted() {
        let manager = ConnectionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        manager.register("doc-1".to_string(), "node-1".to_string(), tx);
        drop(rx);

        assert_eq!(manager.broadcast_except("doc-1", None, ServerMessage::Pong), 0);
    }
}
