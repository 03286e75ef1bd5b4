//! Broadcast dispatcher: one upstream message → every live subscriber.
//!
//! Raw-binary subscribers get the upstream bytes as-is (a refcount bump, no
//! copy). The structured-text rendering is produced lazily, at most once per
//! dispatch, and only if a structured-text subscriber is actually visited.
//! Subscribers whose outbound backlog is above the threshold are evicted
//! inline, since backpressure is only observable at send time.

use crate::connection::CapabilityClass;
use crate::protocol::render_structured;
use crate::registry::{ConnectionRegistry, EvictReason};
use axum::extract::ws::{Message, Utf8Bytes};
use bytes::Bytes;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

/// What happened during one dispatch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Connections the message was queued for.
    pub delivered: usize,
    /// Connections evicted for exceeding the backpressure threshold.
    pub evicted: usize,
    /// Connections whose queue rejected the write.
    pub failed: usize,
    /// Structured-text connections skipped because the payload did not decode.
    pub skipped: usize,
    /// Whether a decode was attempted.
    pub decoded: bool,
}

/// Fans a single upstream payload out to the registry.
pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    backpressure_threshold: usize,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, backpressure_threshold: usize) -> Self {
        Self {
            registry,
            backpressure_threshold,
        }
    }

    /// Offer `raw` to every connection registered right now.
    pub fn dispatch(&self, raw: &Bytes) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if self.registry.is_empty() {
            return outcome;
        }

        let mut text = StructuredText::new(raw);

        for connection in self.registry.snapshot() {
            if connection.pending_outbound_bytes() > self.backpressure_threshold {
                if self
                    .registry
                    .evict(&connection.id, EvictReason::Backpressure)
                {
                    outcome.evicted += 1;
                }
                continue;
            }

            let msg = match connection.capability() {
                CapabilityClass::RawBinary => Message::Binary(raw.clone()),
                CapabilityClass::StructuredText => match text.get() {
                    Some(text) => Message::Text(text.clone()),
                    None => {
                        outcome.skipped += 1;
                        continue;
                    }
                },
            };

            match connection.enqueue(msg) {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    debug!("Dropping connection {}: {}", connection.id, e);
                    if self.registry.evict(&connection.id, EvictReason::WriteFailed) {
                        outcome.failed += 1;
                    }
                }
            }
        }

        outcome.decoded = text.decoded();
        counter!("relay_messages_delivered_total").increment(outcome.delivered as u64);
        outcome
    }
}

/// Per-dispatch cache of the structured-text rendering.
struct StructuredText<'a> {
    raw: &'a [u8],
    rendered: Option<Option<Utf8Bytes>>,
}

impl<'a> StructuredText<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Self {
            raw,
            rendered: None,
        }
    }

    /// Rendering of the payload, computed on first call. `None` if the
    /// payload does not decode.
    fn get(&mut self) -> Option<&Utf8Bytes> {
        let raw = self.raw;
        self.rendered
            .get_or_insert_with(|| match render_structured(raw) {
                Ok(json) => Some(Utf8Bytes::from(json)),
                Err(e) => {
                    warn!("Cannot render upstream payload ({} bytes) as text: {}", raw.len(), e);
                    counter!("relay_decode_errors_total").increment(1);
                    None
                }
            })
            .as_ref()
    }

    fn decoded(&self) -> bool {
        self.rendered.is_some()
    }
}
