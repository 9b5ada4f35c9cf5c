//! Version codec
//!
//! Versions cross into the host as 8-byte big-endian buffers rather than
//! numbers, which cannot hold every 64-bit version. Big-endian keeps byte
//! order and numeric order the same for non-negative versions.

use crate::error::BridgeError;

pub const VERSION_LEN: usize = 8;

pub fn encode_version(version: i64) -> [u8; VERSION_LEN] {
    version.to_be_bytes()
}

pub fn decode_version(bytes: &[u8]) -> Result<i64, BridgeError> {
    let bytes: [u8; VERSION_LEN] = bytes.try_into().map_err(|_| BridgeError::InvalidVersion)?;
    Ok(i64::from_be_bytes(bytes))
}
