//! Real-time fan-out relay for trade signals.
//!
//! This service:
//! - Subscribes to a single upstream NATS channel carrying binary trade signals
//! - Accepts WebSocket connections from subscribers
//! - Forwards every signal to every live subscriber, either as the raw
//!   binary payload or as a JSON rendering, per subscriber
//! - Evicts subscribers that stop draining or stop answering pings
//!
//! ## Architecture
//!
//! ```text
//! NATS: signals
//!         ↓
//! UpstreamSubscriber (ordered, reconnecting)
//!         ↓
//! BroadcastDispatcher (lazy single decode, inline backpressure eviction)
//!         ↓
//! ConnectionRegistry (DashMap) ← HeartbeatMonitor
//!         ↓
//! per-connection writer tasks → WebSocket subscribers
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod protocol;
pub mod registry;
pub mod upstream;
pub mod ws_server;

pub use config::RelayConfig;
pub use connection::{CapabilityClass, Connection, ConnectionId};
pub use dispatcher::{BroadcastDispatcher, DispatchOutcome};
pub use error::{RelayError, Result};
pub use heartbeat::HeartbeatMonitor;
pub use protocol::{ClientMessage, OutputFormat};
pub use registry::{ConnectionRegistry, EvictReason};
pub use upstream::{NatsUpstream, UpstreamSource, UpstreamStatus, UpstreamSubscriber};
pub use ws_server::{bind_listener, close_connections, create_router, AppState};
