//! Heartbeat ping/pong liveness monitoring.
//!
//! Every interval the monitor pings all connections, then evicts those
//! that did not answer the previous cycle's ping. A silent connection
//! therefore survives exactly one full interval after its last chance to
//! respond.

use crate::registry::{ConnectionRegistry, EvictReason};
use axum::extract::ws::Message;
use bytes::Bytes;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodic liveness sweeper over the connection registry.
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// One heartbeat cycle. Returns the number of connections pruned.
    pub fn probe_and_sweep(&self) -> usize {
        for connection in self.registry.snapshot() {
            // A closed queue shows up as unresponsive in the sweep below.
            let _ = connection.enqueue(Message::Ping(Bytes::new()));
        }

        let pruned = self
            .registry
            .sweep_and_reset()
            .iter()
            .filter(|id| self.registry.evict(id, EvictReason::Heartbeat))
            .count();

        if pruned > 0 {
            counter!("relay_heartbeat_pruned_total").increment(pruned as u64);
            info!(
                "Heartbeat pruned {} connections ({} remaining)",
                pruned,
                self.registry.len()
            );
        } else {
            debug!("Heartbeat: {} connections alive", self.registry.len());
        }
        pruned
    }

    /// Run until `shutdown` is cancelled. The first cycle fires one
    /// interval after start.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Heartbeat monitor running every {:?}", self.interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.probe_and_sweep();
                }
            }
        }

        info!("Heartbeat monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use tokio::sync::mpsc::UnboundedReceiver;

    const INTERVAL: Duration = Duration::from_secs(30);

    fn register(registry: &ConnectionRegistry) -> (Arc<Connection>, UnboundedReceiver<Message>) {
        let (conn, rx) = Connection::new();
        registry.register(conn.clone());
        (conn, rx)
    }

    #[test]
    fn test_cycle_sends_ping() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_conn, mut rx) = register(&registry);

        HeartbeatMonitor::new(registry, INTERVAL).probe_and_sweep();

        assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
    }

    #[test]
    fn test_silent_connection_survives_first_cycle() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = register(&registry);
        let monitor = HeartbeatMonitor::new(registry.clone(), INTERVAL);

        assert_eq!(monitor.probe_and_sweep(), 0);
        assert!(registry.get(&conn.id).is_some());

        assert_eq!(monitor.probe_and_sweep(), 1);
        assert!(registry.get(&conn.id).is_none());
        assert!(conn.is_closed());
    }

    #[test]
    fn test_responsive_connection_is_kept() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = register(&registry);
        let monitor = HeartbeatMonitor::new(registry.clone(), INTERVAL);

        for _ in 0..5 {
            assert_eq!(monitor.probe_and_sweep(), 0);
            registry.mark_alive(&conn.id);
        }
        assert!(registry.get(&conn.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pruned_after_exactly_one_silent_interval() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (silent, _silent_rx) = register(&registry);
        let (chatty, mut chatty_rx) = register(&registry);

        let shutdown = CancellationToken::new();
        let monitor = HeartbeatMonitor::new(registry.clone(), INTERVAL);
        let handle = tokio::spawn(monitor.run(shutdown.clone()));

        // Answer every ping the chatty connection gets.
        let responder_registry = registry.clone();
        let chatty_id = chatty.id;
        let responder = tokio::spawn(async move {
            while let Some(msg) = chatty_rx.recv().await {
                if matches!(msg, Message::Ping(_)) {
                    responder_registry.mark_alive(&chatty_id);
                }
            }
        });

        // t=29s: no probe yet.
        time::sleep(Duration::from_secs(29)).await;
        assert_eq!(registry.len(), 2);

        // t=31s: first probe sent, alive flags reset, nobody pruned.
        time::sleep(Duration::from_secs(2)).await;
        assert!(registry.get(&silent.id).is_some());

        // t=59s: still inside the response window.
        time::sleep(Duration::from_secs(28)).await;
        assert!(registry.get(&silent.id).is_some());

        // t=61s: second cycle prunes the silent one only.
        time::sleep(Duration::from_secs(2)).await;
        assert!(registry.get(&silent.id).is_none());
        assert!(silent.is_closed());
        assert!(registry.get(&chatty.id).is_some());

        shutdown.cancel();
        handle.await.unwrap();
        responder.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_shutdown() {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(HeartbeatMonitor::new(registry, INTERVAL).run(shutdown.clone()));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
