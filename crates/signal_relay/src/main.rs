//! Signal relay entry point.
//!
//! Fans trade signals from one NATS channel out to WebSocket subscribers.

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use signal_relay::{
    bind_listener, close_connections, create_router, AppState, BroadcastDispatcher,
    ConnectionRegistry, HeartbeatMonitor, NatsUpstream, RelayConfig, UpstreamSubscriber,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting signal relay");

    let config = RelayConfig::from_env()?;

    info!("Configuration:");
    info!("  HTTP_PORT: {}", config.http_port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  NATS_URL: {}", config.nats_url);
    info!("  UPSTREAM_CHANNEL: {}", config.upstream_channel);
    info!("  HEARTBEAT_INTERVAL: {:?}", config.heartbeat_interval);
    info!("  BACKPRESSURE_THRESHOLD_BYTES: {}", config.backpressure_threshold);
    info!("  MAX_MESSAGE_SIZE: {}", config.max_message_size);
    info!("  ACCEPT_BACKLOG: {}", config.accept_backlog);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(BroadcastDispatcher::new(
        registry.clone(),
        config.backpressure_threshold,
    ));

    let shutdown = CancellationToken::new();

    // Heartbeat stops with the acceptor.
    let heartbeat = HeartbeatMonitor::new(registry.clone(), config.heartbeat_interval);
    let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown.child_token()));

    // Upstream is stopped last, after subscribers are closed.
    let upstream_shutdown = CancellationToken::new();
    let upstream = UpstreamSubscriber::new(
        NatsUpstream::new(config.nats_url.clone()),
        config.upstream_channel.clone(),
        dispatcher,
        config.backoff(),
    );
    let upstream_status = upstream.status();
    let upstream_handle = tokio::spawn(upstream.run(upstream_shutdown.clone()));

    let state = Arc::new(AppState::new(
        registry,
        upstream_status,
        config.max_message_size,
        shutdown.clone(),
    ));
    let app = create_router(state.clone());

    let addr = config.listen_addr();
    let listener = bind_listener(addr, config.accept_backlog)?;
    info!("Signal relay listening on {}", addr);

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_shutdown.cancel();
        })
        .await?;

    info!("Shutting down...");
    shutdown.cancel();
    let _ = heartbeat_handle.await;

    let closed = close_connections(&state).await;
    info!("Closed {} subscriber connections", closed);

    upstream_shutdown.cancel();
    let _ = upstream_handle.await;

    info!("Signal relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
