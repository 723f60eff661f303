//! Datagram payloads are the decimal ASCII text of one non-negative integer:
//! a segment number from sender to receiver, or a cumulative acknowledgment
//! number from receiver to sender. No header, no length prefix, no checksum.

use crate::error::{RenoError, Result};

/// Largest payload a well-formed datagram can carry (`u64::MAX` is 20 digits).
pub const MAX_PAYLOAD: usize = 20;

pub fn encode(n: u64) -> Vec<u8> {
    n.to_string().into_bytes()
}

pub fn decode(payload: &[u8]) -> Result<u64> {
    std::str::from_utf8(payload)
        .ok()
        .map(|text| text.trim_matches(|c: char| c.is_ascii_whitespace()))
        .filter(|text| !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| RenoError::MalformedPayload {
            payload: String::from_utf8_lossy(payload).into_owned(),
        })
}
