//! Relay configuration, loaded from the environment.

use crate::error::{RelayError, Result};
use common::Backoff;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Default backpressure threshold: 512 KiB of unsent outbound data.
pub const DEFAULT_BACKPRESSURE_THRESHOLD: usize = 512 * 1024;

/// Default cap on a single inbound WebSocket message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Process-level relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port the WebSocket/HTTP server listens on.
    pub http_port: u16,
    /// Port for the Prometheus exporter.
    pub metrics_port: u16,
    /// NATS server URL.
    pub nats_url: String,
    /// Upstream channel (NATS subject) carrying binary trade signals.
    pub upstream_channel: String,
    /// Interval between liveness probes.
    pub heartbeat_interval: Duration,
    /// Pending outbound bytes above which a subscriber is evicted.
    pub backpressure_threshold: usize,
    /// Maximum inbound message size accepted from a subscriber.
    pub max_message_size: usize,
    /// TCP accept backlog.
    pub accept_backlog: u32,
    /// First upstream reconnect delay.
    pub reconnect_initial: Duration,
    /// Upper bound on the upstream reconnect delay.
    pub reconnect_max: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            metrics_port: 9093,
            nats_url: "nats://localhost:4222".to_string(),
            upstream_channel: "signals".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            backpressure_threshold: DEFAULT_BACKPRESSURE_THRESHOLD,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            accept_backlog: 2048,
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(5),
        }
    }
}

impl RelayConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, falling back to
    /// defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            http_port: parse_var(&lookup, "HTTP_PORT", defaults.http_port)?,
            metrics_port: parse_var(&lookup, "METRICS_PORT", defaults.metrics_port)?,
            nats_url: lookup("NATS_URL").unwrap_or(defaults.nats_url),
            upstream_channel: lookup("UPSTREAM_CHANNEL").unwrap_or(defaults.upstream_channel),
            heartbeat_interval: Duration::from_secs(parse_var(
                &lookup,
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
            backpressure_threshold: parse_var(
                &lookup,
                "BACKPRESSURE_THRESHOLD_BYTES",
                defaults.backpressure_threshold,
            )?,
            max_message_size: parse_var(&lookup, "MAX_MESSAGE_SIZE", defaults.max_message_size)?,
            accept_backlog: parse_var(&lookup, "ACCEPT_BACKLOG", defaults.accept_backlog)?,
            reconnect_initial: Duration::from_millis(parse_var(
                &lookup,
                "RECONNECT_INITIAL_MS",
                defaults.reconnect_initial.as_millis() as u64,
            )?),
            reconnect_max: Duration::from_millis(parse_var(
                &lookup,
                "RECONNECT_MAX_MS",
                defaults.reconnect_max.as_millis() as u64,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.upstream_channel.trim().is_empty() {
            return Err(RelayError::Config("UPSTREAM_CHANNEL must not be empty".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(RelayError::Config(
                "HEARTBEAT_INTERVAL_SECS must be greater than zero".into(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(RelayError::Config(
                "MAX_MESSAGE_SIZE must be greater than zero".into(),
            ));
        }
        if self.reconnect_initial.is_zero() || self.reconnect_max < self.reconnect_initial {
            return Err(RelayError::Config(
                "RECONNECT_INITIAL_MS must be non-zero and not exceed RECONNECT_MAX_MS".into(),
            ));
        }
        Ok(())
    }

    /// Address the WebSocket server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.http_port))
    }

    /// Reconnect schedule for the upstream subscriber.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_initial, self.reconnect_max)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RelayError::Config(format!("{} must be a number ({}): {:?}", key, e, raw))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.upstream_channel, "signals");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.backpressure_threshold, 512 * 1024);
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(config.accept_backlog, 2048);
    }

    #[test]
    fn test_overrides() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("HTTP_PORT", "9000"),
            ("UPSTREAM_CHANNEL", "trade.signals"),
            ("HEARTBEAT_INTERVAL_SECS", "5"),
            ("BACKPRESSURE_THRESHOLD_BYTES", "1024"),
            ("MAX_MESSAGE_SIZE", " 2048 "),
        ]))
        .unwrap();

        assert_eq!(config.http_port, 9000);
        assert_eq!(config.upstream_channel, "trade.signals");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.backpressure_threshold, 1024);
        assert_eq!(config.max_message_size, 2048);
        assert_eq!(config.listen_addr().port(), 9000);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = RelayConfig::from_lookup(lookup_from(&[("HTTP_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, RelayError::Config(msg) if msg.contains("HTTP_PORT")));
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let err = RelayConfig::from_lookup(lookup_from(&[("HEARTBEAT_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_reconnect_bounds_checked() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("RECONNECT_INITIAL_MS", "10000"),
            ("RECONNECT_MAX_MS", "5000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
