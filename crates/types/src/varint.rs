//! Variable-length integer codec used throughout the block binary format.
//!
//! A single prefix byte `n <= 249` encodes the value directly; `250`, `251`
//! and `252` announce a little-endian `u16`, `u32` or `u64` payload.

use thiserror::Error;

const PREFIX_U16: u8 = 250;
const PREFIX_U32: u8 = 251;
const PREFIX_U64: u8 = 252;
const MAX_INLINE: u64 = 249;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarintError {
    #[error("unexpected end of input while reading varint")]
    UnexpectedEof,
    #[error("unsupported varint prefix {0}")]
    UnsupportedPrefix(u8),
}

/// Appends the encoding of `value` to `out`.
pub fn write_varint(value: u64, out: &mut Vec<u8>) {
    if value <= MAX_INLINE {
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(PREFIX_U16);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= u32::MAX as u64 {
        out.push(PREFIX_U32);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(PREFIX_U64);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Reads one varint from the front of `input`, returning the value and the
/// number of bytes consumed.
pub fn read_varint(input: &[u8]) -> Result<(u64, usize), VarintError> {
    let first = *input.first().ok_or(VarintError::UnexpectedEof)?;
    match first {
        0..=249 => Ok((first as u64, 1)),
        PREFIX_U16 => {
            let bytes: [u8; 2] = input
                .get(1..3)
                .ok_or(VarintError::UnexpectedEof)?
                .try_into()
                .map_err(|_| VarintError::UnexpectedEof)?;
            Ok((u16::from_le_bytes(bytes) as u64, 3))
        }
        PREFIX_U32 => {
            let bytes: [u8; 4] = input
                .get(1..5)
                .ok_or(VarintError::UnexpectedEof)?
                .try_into()
                .map_err(|_| VarintError::UnexpectedEof)?;
            Ok((u32::from_le_bytes(bytes) as u64, 5))
        }
        PREFIX_U64 => {
            let bytes: [u8; 8] = input
                .get(1..9)
                .ok_or(VarintError::UnexpectedEof)?
                .try_into()
                .map_err(|_| VarintError::UnexpectedEof)?;
            Ok((u64::from_le_bytes(bytes), 9))
        }
        other => Err(VarintError::UnsupportedPrefix(other)),
    }
}
