//! Upstream subscriber: one channel in, sequential dispatch out.
//!
//! Messages are handed to the dispatcher one at a time in the order the
//! upstream delivers them. When the subscription drops, the subscriber
//! waits on a capped exponential backoff and resubscribes; nothing is
//! broadcast while it is disconnected.

use crate::dispatcher::BroadcastDispatcher;
use async_trait::async_trait;
use bytes::Bytes;
use common::Backoff;
use futures::stream::BoxStream;
use futures::StreamExt;
use metrics::counter;
use nats_client::NatsClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A pub/sub source of raw signal payloads.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Subscribe to `channel`. The stream ends when the subscription is lost.
    async fn subscribe(&self, channel: &str) -> anyhow::Result<BoxStream<'static, Bytes>>;

    /// Transport link flag, for sources whose subscription stream stays
    /// open across outages.
    fn link(&self) -> Option<Arc<AtomicBool>> {
        None
    }
}

/// Whether the relay is currently receiving from upstream.
#[derive(Clone)]
pub struct UpstreamStatus {
    subscribed: Arc<AtomicBool>,
    link: Option<Arc<AtomicBool>>,
}

impl UpstreamStatus {
    /// Status that never changes; for wiring without an upstream.
    pub fn fixed(connected: bool) -> Self {
        Self {
            subscribed: Arc::new(AtomicBool::new(connected)),
            link: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
            && self
                .link
                .as_ref()
                .map_or(true, |link| link.load(Ordering::Acquire))
    }
}

/// NATS core subscription as an upstream source.
///
/// async-nats reconnects and resubscribes by itself, so the subscription
/// stream does not end during a server outage. The link flag follows the
/// client's connect/disconnect events instead.
pub struct NatsUpstream {
    url: String,
    client: Mutex<Option<NatsClient>>,
    link: Arc<AtomicBool>,
}

impl NatsUpstream {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Mutex::new(None),
            link: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl UpstreamSource for NatsUpstream {
    async fn subscribe(&self, channel: &str) -> anyhow::Result<BoxStream<'static, Bytes>> {
        let mut guard = self.client.lock().await;

        let client = match guard.as_ref() {
            Some(client) if client.is_connected() => client.clone(),
            _ => {
                let client = NatsClient::connect_tracked(&self.url, self.link.clone()).await?;
                *guard = Some(client.clone());
                client
            }
        };

        let subscriber = client.subscribe(channel).await?;
        Ok(subscriber.map(|msg| msg.payload).boxed())
    }

    fn link(&self) -> Option<Arc<AtomicBool>> {
        Some(self.link.clone())
    }
}

/// Keeps one upstream subscription alive and feeds the dispatcher.
pub struct UpstreamSubscriber<S> {
    source: S,
    channel: String,
    dispatcher: Arc<BroadcastDispatcher>,
    backoff: Backoff,
    connected: Arc<AtomicBool>,
}

impl<S: UpstreamSource> UpstreamSubscriber<S> {
    pub fn new(
        source: S,
        channel: impl Into<String>,
        dispatcher: Arc<BroadcastDispatcher>,
        backoff: Backoff,
    ) -> Self {
        Self {
            source,
            channel: channel.into(),
            dispatcher,
            backoff,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Live view of the upstream connection, for health reporting.
    pub fn status(&self) -> UpstreamStatus {
        UpstreamStatus {
            subscribed: self.connected.clone(),
            link: self.source.link(),
        }
    }

    /// Subscribe, consume, and resubscribe until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Upstream subscriber starting on '{}'", self.channel);

        'outer: loop {
            let attempt = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                res = self.source.subscribe(&self.channel) => res,
            };

            match attempt {
                Ok(mut stream) => {
                    self.backoff.reset();
                    self.connected.store(true, Ordering::Release);
                    info!("Subscribed to upstream channel '{}'", self.channel);

                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => break 'outer,
                            next = stream.next() => next,
                        };
                        match next {
                            Some(payload) => {
                                counter!("relay_messages_received_total").increment(1);
                                let outcome = self.dispatcher.dispatch(&payload);
                                debug!(
                                    "Dispatched {} bytes: {} delivered, {} evicted",
                                    payload.len(),
                                    outcome.delivered,
                                    outcome.evicted
                                );
                            }
                            None => break,
                        }
                    }

                    self.connected.store(false, Ordering::Release);
                    warn!("Upstream subscription on '{}' ended", self.channel);
                }
                Err(e) => {
                    warn!("Failed to subscribe to '{}': {:#}", self.channel, e);
                }
            }

            let delay = self.backoff.next_delay();
            counter!("relay_upstream_reconnects_total").increment(1);
            info!("Resubscribing to '{}' in {:?}", self.channel, delay);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.connected.store(false, Ordering::Release);
        info!("Upstream subscriber stopped");
    }
}
