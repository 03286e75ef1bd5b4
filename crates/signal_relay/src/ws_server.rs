//! WebSocket acceptor using Axum.
//!
//! Each accepted socket is split: a writer task drains the connection's
//! outbound queue, and the handler loop below reads inbound frames for
//! format negotiation and pong tracking.

use crate::connection::{run_writer, Connection};
use crate::error::Result;
use crate::protocol::{parse_client_message, ClientMessage, OutputFormat};
use crate::registry::ConnectionRegistry;
use crate::upstream::UpstreamStatus;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use metrics::counter;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

/// Shared application state.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    /// Upstream connection state reported by `/health`.
    pub upstream: UpstreamStatus,
    /// Cap on a single inbound WebSocket message.
    pub max_message_size: usize,
    /// Cancelled when the relay shuts down.
    pub shutdown: CancellationToken,
    /// Socket handler and writer tasks. Upgraded sockets outlive
    /// `axum::serve`, so shutdown waits on these instead.
    pub tasks: TaskTracker,
}

impl AppState {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        upstream: UpstreamStatus,
        max_message_size: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            upstream,
            max_message_size,
            shutdown,
            tasks: TaskTracker::new(),
        }
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind the subscriber listener with an explicit accept backlog.
pub fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(backlog)?)
}

/// Close every open subscriber and wait until their close frames have
/// been sent (each bounded by the writer's close grace). Returns how many
/// connections were closed.
pub async fn close_connections(state: &AppState) -> usize {
    state.shutdown.cancel();
    let closed = state.registry.close_all();
    state.tasks.close();
    state.tasks.wait().await;
    closed
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.registry.len(),
        "upstream": state.upstream.is_connected(),
    }))
}

/// WebSocket upgrade handler. Oversized inbound messages are rejected by
/// the protocol layer before they reach [`handle_socket`].
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_upgrade(move |socket| {
            let tasks = state.tasks.clone();
            tasks.track_future(handle_socket(socket, state))
        })
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (ws_tx, mut ws_rx) = socket.split();

    let (connection, rx) = Connection::new();
    let id = state.registry.register(connection.clone());
    counter!("relay_connections_total").increment(1);
    info!("Subscriber {} connected", id);

    let writer = state
        .tasks
        .spawn(run_writer(connection.clone(), ws_tx, rx));

    loop {
        let msg = tokio::select! {
            biased;
            _ = connection.closed() => break,
            _ = state.shutdown.cancelled() => break,
            msg = ws_rx.next() => msg,
        };

        match msg {
            Some(Ok(msg)) => handle_message(&state, &connection, msg),
            Some(Err(e)) => {
                debug!("WebSocket error for {}: {}", id, e);
                break;
            }
            None => break,
        }
    }

    // No-op if the dispatcher or heartbeat already evicted it.
    state.registry.unregister(&id);
    connection.close();
    let _ = writer.await;

    info!(
        "Subscriber {} disconnected after {} ms",
        id,
        connection.connected_for_ms()
    );
}

/// Handle a single inbound frame. Nothing a subscriber sends can close
/// its own connection from here.
fn handle_message(state: &AppState, connection: &Connection, msg: Message) {
    let payload = match &msg {
        Message::Text(text) => text.as_str().as_bytes(),
        Message::Binary(data) => &data[..],
        Message::Pong(_) => {
            state.registry.mark_alive(&connection.id);
            return;
        }
        Message::Ping(_) | Message::Close(_) => return,
    };

    match parse_client_message(payload) {
        Some(ClientMessage::Format {
            format: OutputFormat::Json,
        }) => {
            if connection.declare_structured_text() {
                debug!("Subscriber {} switched to structured text", connection.id);
            }
        }
        Some(ClientMessage::Format {
            format: OutputFormat::Binary,
        }) => {}
        None => {}
    }
}
