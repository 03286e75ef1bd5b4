//! Connection registry.
//!
//! Sharded DashMap keyed by connection id. It is the only state shared
//! between the acceptor, the heartbeat monitor and the dispatcher.
//! Removal always goes through [`ConnectionRegistry::unregister`], and only
//! the caller that actually removed an entry gets it back, so exactly one
//! party closes any given connection.

use crate::connection::{Connection, ConnectionId};
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::sync::Arc;
use tracing::{debug, info};

/// Why a connection was forcibly removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Outbound backlog exceeded the backpressure threshold.
    Backpressure,
    /// No response to the previous liveness probe.
    Heartbeat,
    /// Outbound queue rejected a write.
    WriteFailed,
    /// Relay is shutting down.
    Shutdown,
}

impl EvictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictReason::Backpressure => "backpressure",
            EvictReason::Heartbeat => "heartbeat",
            EvictReason::WriteFailed => "write_failed",
            EvictReason::Shutdown => "shutdown",
        }
    }
}

/// Concurrent set of live subscriber connections.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a new connection.
    pub fn register(&self, connection: Arc<Connection>) -> ConnectionId {
        let id = connection.id;
        self.connections.insert(id, connection);
        gauge!("relay_active_connections").set(self.connections.len() as f64);
        debug!("Connection {} registered", id);
        id
    }

    /// Remove a connection and close it. Returns the connection if this
    /// call removed it, `None` if it was already gone.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(id)?;
        connection.close();
        gauge!("relay_active_connections").set(self.connections.len() as f64);
        debug!("Connection {} unregistered", id);
        Some(connection)
    }

    /// Forcibly remove and close a connection. Returns whether this call
    /// performed the eviction.
    pub fn evict(&self, id: &ConnectionId, reason: EvictReason) -> bool {
        if self.unregister(id).is_none() {
            return false;
        }
        counter!("relay_evictions_total", "reason" => reason.as_str()).increment(1);
        info!("Evicted connection {} ({})", id, reason.as_str());
        true
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|c| c.clone())
    }

    /// Connections registered at call time. Each appears once.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Record a probe response for `id`. Returns false for unknown ids.
    pub fn mark_alive(&self, id: &ConnectionId) -> bool {
        match self.connections.get(id) {
            Some(connection) => {
                connection.mark_alive();
                true
            }
            None => false,
        }
    }

    /// Collect connections that were not marked alive since the previous
    /// sweep, and clear the alive flag on every connection so the next
    /// sweep demands a fresh response.
    pub fn sweep_and_reset(&self) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|e| !e.value().check_alive())
            .map(|e| *e.key())
            .collect()
    }

    /// Close every registered connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        ids.iter()
            .filter(|id| self.evict(id, EvictReason::Shutdown))
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = Connection::new();
        let id = registry.register(conn.clone());

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&id).is_some());

        let removed = registry.unregister(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(conn.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_only_one_remover_wins() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = Connection::new();
        let id = registry.register(conn);

        assert!(registry.evict(&id, EvictReason::Heartbeat));
        assert!(!registry.evict(&id, EvictReason::Backpressure));
        assert!(registry.unregister(&id).is_none());
    }

    #[test]
    fn test_snapshot_lists_each_connection_once() {
        let registry = ConnectionRegistry::new();
        let mut ids = HashSet::new();
        let mut receivers = Vec::new();
        for _ in 0..50 {
            let (conn, rx) = Connection::new();
            ids.insert(registry.register(conn));
            receivers.push(rx);
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 50);
        let seen: HashSet<_> = snapshot.iter().map(|c| c.id).collect();
        assert_eq!(seen, ids);

        // Registered after the snapshot: visible to the next one.
        let (late, _late_rx) = Connection::new();
        let late_id = registry.register(late);
        assert!(registry.snapshot().iter().any(|c| c.id == late_id));
    }

    #[test]
    fn test_sweep_returns_unresponsive_and_resets() {
        let registry = ConnectionRegistry::new();
        let (responsive, _rx1) = Connection::new();
        let (silent, _rx2) = Connection::new();
        let responsive_id = registry.register(responsive);
        let silent_id = registry.register(silent);

        // Both start alive, so the first sweep only resets.
        assert!(registry.sweep_and_reset().is_empty());

        assert!(registry.mark_alive(&responsive_id));
        assert_eq!(registry.sweep_and_reset(), vec![silent_id]);

        // Sweep does not remove; the caller decides.
        assert_eq!(registry.len(), 2);
        // The responsive one must answer again before the next sweep.
        let dead: HashSet<_> = registry.sweep_and_reset().into_iter().collect();
        assert!(dead.contains(&responsive_id));
    }

    #[test]
    fn test_mark_alive_unknown_id() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.mark_alive(&uuid::Uuid::new_v4()));
    }

    #[test]
    fn test_close_all() {
        let registry = ConnectionRegistry::new();
        let conns: Vec<_> = (0..3)
            .map(|_| {
                let (conn, rx) = Connection::new();
                registry.register(conn.clone());
                (conn, rx)
            })
            .collect();

        assert_eq!(registry.close_all(), 3);
        assert!(registry.is_empty());
        assert!(conns.iter().all(|(c, _)| c.is_closed()));
    }

    #[test]
    fn test_concurrent_register_and_evict() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let (conn, _rx) = Connection::new();
                        let id = registry.register(conn);
                        let _ = registry.snapshot();
                        assert!(registry.evict(&id, EvictReason::WriteFailed));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
