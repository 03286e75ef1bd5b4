//! Subscriber-facing message formats.
//!
//! Inbound: a small JSON control message a subscriber may send to choose
//! its encoding. Outbound: either the upstream binary payload untouched, or
//! the JSON rendering produced here.

use crate::error::{RelayError, Result};
use common::codec;
use serde::Deserialize;

// ============================================================================
// Subscriber → Relay
// ============================================================================

/// Control message sent by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Choose the outbound encoding, e.g. `{"type":"format","format":"json"}`.
    Format { format: OutputFormat },
}

/// Encodings a subscriber can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Binary,
    Json,
}

/// Parse a control message. Anything unrecognised is `None`.
pub fn parse_client_message(data: &[u8]) -> Option<ClientMessage> {
    serde_json::from_slice(data).ok()
}

// ============================================================================
// Relay → Subscriber
// ============================================================================

/// Decode an upstream payload and render its structured-text form.
///
/// JSON numbers cannot carry NaN or infinities, so such prices are
/// rejected rather than rendered as `null`.
pub fn render_structured(raw: &[u8]) -> Result<String> {
    let signal = codec::decode(raw)?;
    if !signal.price.is_finite() {
        return Err(RelayError::NonFinitePrice(signal.price));
    }
    Ok(signal.to_json()?)
}
