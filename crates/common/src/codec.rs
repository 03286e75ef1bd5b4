//! Binary wire codec for [`TradeSignal`].
//!
//! The layout is protobuf-compatible and always canonical:
//!
//! ```text
//! 0x08 varint(master_id)
//! 0x12 varint(len) symbol-utf8
//! 0x1A varint(len) action-utf8
//! 0x21 f64 little-endian (8 bytes)
//! ```
//!
//! Decoding only accepts that exact layout (fields in order, minimal
//! varints, nothing trailing), so any accepted payload re-encodes to the
//! same bytes. Malformed input yields a [`DecodeError`], never a panic.

use crate::error::{DecodeError, Result};
use crate::messages::{Action, TradeSignal};
use bytes::{BufMut, Bytes, BytesMut};

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;

const fn tag(field: u8, wire_type: u8) -> u8 {
    (field << 3) | wire_type
}

pub const TAG_MASTER_ID: u8 = tag(1, WIRE_VARINT);
pub const TAG_SYMBOL: u8 = tag(2, WIRE_LEN);
pub const TAG_ACTION: u8 = tag(3, WIRE_LEN);
pub const TAG_PRICE: u8 = tag(4, WIRE_FIXED64);

/// Longest LEB128 encoding of a u64.
const MAX_VARINT_LEN: usize = 10;

fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn put_str(buf: &mut BytesMut, field_tag: u8, s: &str) {
    buf.put_u8(field_tag);
    put_varint(buf, s.len() as u64);
    buf.put_slice(s.as_bytes());
}

/// Exact number of bytes [`encode`] produces for `signal`.
pub fn encoded_len(signal: &TradeSignal) -> usize {
    let symbol = signal.symbol.len();
    let action = signal.action.as_str().len();
    1 + varint_len(signal.master_id)
        + 1
        + varint_len(symbol as u64)
        + symbol
        + 1
        + varint_len(action as u64)
        + action
        + 1
        + 8
}

/// Append the wire form of `signal` to `buf`.
pub fn encode_into(signal: &TradeSignal, buf: &mut BytesMut) {
    buf.reserve(encoded_len(signal));
    buf.put_u8(TAG_MASTER_ID);
    put_varint(buf, signal.master_id);
    put_str(buf, TAG_SYMBOL, &signal.symbol);
    put_str(buf, TAG_ACTION, signal.action.as_str());
    buf.put_u8(TAG_PRICE);
    buf.put_f64_le(signal.price);
}

/// Encode `signal` to its wire form.
pub fn encode(signal: &TradeSignal) -> Bytes {
    let mut buf = BytesMut::with_capacity(encoded_len(signal));
    encode_into(signal, &mut buf);
    buf.freeze()
}

/// Decode a wire payload into a [`TradeSignal`].
pub fn decode(input: &[u8]) -> Result<TradeSignal> {
    let mut reader = Reader { input, pos: 0 };

    reader.expect_tag(TAG_MASTER_ID, "master_id")?;
    let master_id = reader.read_varint("master_id")?;

    reader.expect_tag(TAG_SYMBOL, "symbol")?;
    let symbol = reader.read_str("symbol")?.to_string();

    reader.expect_tag(TAG_ACTION, "action")?;
    let action_str = reader.read_str("action")?;
    let action = action_str
        .parse::<Action>()
        .map_err(DecodeError::UnknownAction)?;

    reader.expect_tag(TAG_PRICE, "price")?;
    let price = f64::from_le_bytes(reader.read_array::<8>("price")?);

    let trailing = reader.remaining();
    if trailing != 0 {
        return Err(DecodeError::TrailingBytes(trailing));
    }

    Ok(TradeSignal {
        master_id,
        symbol,
        action,
        price,
    })
}

/// Bounds-checked cursor over an untrusted payload.
struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or(DecodeError::Truncated(field))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_slice(&mut self, len: usize, field: &'static str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(DecodeError::Truncated(field));
        }
        let slice = &self.input[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N, field)?);
        Ok(out)
    }

    fn expect_tag(&mut self, expected: u8, field: &'static str) -> Result<()> {
        let found = self.read_u8(field)?;
        if found != expected {
            return Err(DecodeError::UnexpectedTag {
                field,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn read_varint(&mut self, field: &'static str) -> Result<u64> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let byte = self.read_u8(field)?;
            // The 10th byte may only carry the top bit of a u64.
            if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
                return Err(DecodeError::VarintOverflow(field));
            }
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                if i > 0 && byte == 0 {
                    return Err(DecodeError::NonCanonicalVarint(field));
                }
                return Ok(value);
            }
        }
        Err(DecodeError::VarintOverflow(field))
    }

    fn read_str(&mut self, field: &'static str) -> Result<&'a str> {
        let len = self.read_varint(field)?;
        let len = usize::try_from(len).map_err(|_| DecodeError::Truncated(field))?;
        let bytes = self.read_slice(len, field)?;
        std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8(field))
    }
}
