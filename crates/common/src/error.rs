//! Error types for the signal wire codec.

use thiserror::Error;

/// Reasons a binary trade signal payload can be rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated input while reading {0}")]
    Truncated(&'static str),

    #[error("Varint for {0} overflows 64 bits")]
    VarintOverflow(&'static str),

    #[error("Varint for {0} is not minimally encoded")]
    NonCanonicalVarint(&'static str),

    #[error("Unexpected tag 0x{found:02x}, expected {field} (0x{expected:02x})")]
    UnexpectedTag {
        field: &'static str,
        expected: u8,
        found: u8,
    },

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("Unknown action: {0:?}")]
    UnknownAction(String),

    #[error("{0} trailing bytes after signal")]
    TrailingBytes(usize),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
