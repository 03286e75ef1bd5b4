//! Per-subscriber connection state and its outbound writer.
//!
//! Every connection owns an unbounded FIFO queue drained by a dedicated
//! writer task. Enqueueing never blocks the dispatch path; instead the
//! number of bytes sitting in the queue is tracked so the dispatcher can
//! shed subscribers that stop draining.

use crate::error::{RelayError, Result};
use axum::extract::ws::Message;
use chrono::Utc;
use futures::{Sink, SinkExt};
use metrics::counter;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;
use uuid::Uuid;

/// Unique connection identifier.
pub type ConnectionId = Uuid;

/// How long a closing writer waits for the close frame to flush.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Encoding a subscriber receives signals in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CapabilityClass {
    /// Upstream binary payload, forwarded unmodified.
    RawBinary = 0,
    /// JSON field/value rendering of the decoded signal.
    StructuredText = 1,
}

impl CapabilityClass {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CapabilityClass::StructuredText,
            _ => CapabilityClass::RawBinary,
        }
    }
}

/// State for a single connected subscriber.
pub struct Connection {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// Timestamp (ms) when the connection was accepted.
    pub connected_at: i64,
    capability: AtomicU8,
    alive: AtomicBool,
    pending_bytes: AtomicUsize,
    tx: mpsc::UnboundedSender<Message>,
    close: CancellationToken,
}

impl Connection {
    /// Create a connection in the default `RawBinary` class, marked alive.
    /// Returns the receiving end of its outbound queue for the writer task.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            connected_at: Utc::now().timestamp_millis(),
            capability: AtomicU8::new(CapabilityClass::RawBinary as u8),
            alive: AtomicBool::new(true),
            pending_bytes: AtomicUsize::new(0),
            tx,
            close: CancellationToken::new(),
        });
        (connection, rx)
    }

    /// Milliseconds since the connection was accepted.
    pub fn connected_for_ms(&self) -> i64 {
        Utc::now().timestamp_millis() - self.connected_at
    }

    pub fn capability(&self) -> CapabilityClass {
        CapabilityClass::from_u8(self.capability.load(Ordering::Acquire))
    }

    /// Move to `StructuredText`. Only the first call transitions;
    /// returns whether this call did.
    pub fn declare_structured_text(&self) -> bool {
        self.capability
            .compare_exchange(
                CapabilityClass::RawBinary as u8,
                CapabilityClass::StructuredText as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Record a probe response.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Read and clear the alive flag.
    pub fn check_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Bytes queued for this subscriber that have not reached the socket.
    pub fn pending_outbound_bytes(&self) -> usize {
        self.pending_bytes.load(Ordering::Acquire)
    }

    /// Queue a message for the writer task. Never blocks.
    pub fn enqueue(&self, msg: Message) -> Result<()> {
        if self.is_closed() {
            return Err(RelayError::ConnectionClosed);
        }
        let len = payload_len(&msg);
        self.pending_bytes.fetch_add(len, Ordering::AcqRel);
        self.tx.send(msg).map_err(|_| {
            self.release(len);
            RelayError::ConnectionClosed
        })
    }

    /// Account for `len` bytes leaving the queue.
    pub fn release(&self, len: usize) {
        self.pending_bytes.fetch_sub(len, Ordering::AcqRel);
    }

    /// Signal the socket tasks to shut this connection down. Idempotent.
    pub fn close(&self) {
        self.close.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.close.cancelled()
    }
}

/// Payload size counted against the backpressure threshold.
pub fn payload_len(msg: &Message) -> usize {
    match msg {
        Message::Text(text) => text.as_str().len(),
        Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data.len(),
        Message::Close(_) => 0,
    }
}

/// Drain a connection's outbound queue into its socket sink.
///
/// Exits when the connection is closed, the queue is dropped, or a write
/// fails (which closes the connection). A close frame is attempted on the
/// way out, bounded by [`CLOSE_GRACE`].
pub async fn run_writer<S>(
    connection: Arc<Connection>,
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Message>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = connection.closed() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let len = payload_len(&msg);
        let sent = tokio::select! {
            biased;
            _ = connection.closed() => break,
            res = sink.send(msg) => res,
        };
        connection.release(len);

        if let Err(e) = sent {
            debug!("Write to connection {} failed: {}", connection.id, e);
            counter!("relay_write_failures_total").increment(1);
            break;
        }
    }

    connection.close();
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
}
