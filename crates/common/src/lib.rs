//! Shared types for the signal relay: the trade signal entity, its binary
//! wire codec, and reconnect backoff.

pub mod backoff;
pub mod codec;
pub mod error;
pub mod messages;

pub use backoff::Backoff;
pub use error::DecodeError;
pub use messages::{Action, TradeSignal};
