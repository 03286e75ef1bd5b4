//! NATS core client used for upstream signal ingestion.

use anyhow::Result;
use async_nats::{Client, ConnectOptions, Event, Subscriber};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for the initial TCP/handshake with the NATS server.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wrapper around the NATS client.
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect, keeping `connected` in step with the client's own
    /// disconnect/reconnect events.
    pub async fn connect_tracked(url: &str, connected: Arc<AtomicBool>) -> Result<Self> {
        info!("Connecting to NATS at {}", url);
        let flag = connected.clone();
        let client = ConnectOptions::new()
            .name("signal_relay")
            .connection_timeout(DEFAULT_CONNECT_TIMEOUT)
            .event_callback(move |event| {
                let flag = flag.clone();
                async move { apply_event(&flag, &event) }
            })
            .connect(url)
            .await?;
        connected.store(true, Ordering::Release);
        Ok(Self { client })
    }

    /// Subscribe to a subject using NATS Core (low-latency push).
    /// Messages are delivered in publish order as they arrive.
    pub async fn subscribe(&self, subject: &str) -> Result<Subscriber> {
        info!("Subscribing to subject: {}", subject);
        let subscriber = self.client.subscribe(subject.to_string()).await?;
        Ok(subscriber)
    }

    /// Whether the underlying connection is currently established.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }
}

fn apply_event(connected: &AtomicBool, event: &Event) {
    match event {
        Event::Connected => {
            connected.store(true, Ordering::Release);
            info!("NATS connection established");
        }
        Event::Disconnected => {
            connected.store(false, Ordering::Release);
            warn!("NATS connection lost");
        }
        other => debug!("NATS event: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_drive_connected_flag() {
        let connected = AtomicBool::new(true);

        apply_event(&connected, &Event::Disconnected);
        assert!(!connected.load(Ordering::Acquire));

        apply_event(&connected, &Event::LameDuckMode);
        assert!(!connected.load(Ordering::Acquire));

        apply_event(&connected, &Event::Connected);
        assert!(connected.load(Ordering::Acquire));
    }
}
