// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! 7-bit safe binary encoding for SysEx payloads.
//!
//! Input is processed in groups of up to 7 bytes. Each group is emitted as a
//! control byte followed by the low 7 bits of every group byte; bit `i` of
//! the control byte carries bit 7 of group byte `i`.

use thiserror::Error;
use crate::protocol::INT_ENCODED_LEN;

const GROUP: usize = 7;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed 7-bit encoding at offset {offset}")]
    MalformedEncoding { offset: usize },
}

/// Number of SysEx bytes produced for `len` binary bytes.
pub fn encoded_len(len: usize) -> usize {
    len + len.div_ceil(GROUP)
}

/// Upper bound on binary bytes recovered from `len` SysEx bytes.
pub fn decoded_len(len: usize) -> usize {
    len - len.div_ceil(GROUP + 1)
}

pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(data.len()));
    encode_into(data, &mut out);
    out
}

pub fn encode_into(data: &[u8], out: &mut Vec<u8>) {
    for group in data.chunks(GROUP) {
        let control = group
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &b)| acc | ((b >> 7) << i));
        out.push(control);
        out.extend(group.iter().map(|&b| b & 0x7F));
    }
}

pub fn decode(sysex: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(decoded_len(sysex.len()));
    decode_into(sysex, &mut out)?;
    Ok(out)
}

/// Decodes `sysex` and appends the result to `out`. On error `out` may hold
/// a partially decoded prefix.
pub fn decode_into(sysex: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    for (n, group) in sysex.chunks(GROUP + 1).enumerate() {
        let offset = n * (GROUP + 1);
        let control = group[0];
        let body = &group[1..];

        // a control byte must announce at least one byte and no high bits
        // for positions past the end of the group
        if body.is_empty() || control >> body.len() != 0 {
            return Err(CodecError::MalformedEncoding { offset });
        }

        for (i, &b) in body.iter().enumerate() {
            if b & 0x80 != 0 {
                return Err(CodecError::MalformedEncoding { offset: offset + 1 + i });
            }
            out.push(b | (((control >> i) & 0x01) << 7));
        }
    }
    Ok(())
}

/// Encodes an integer field: 4 bytes big-endian, always 5 SysEx bytes.
pub fn encode_u32(value: u32) -> [u8; INT_ENCODED_LEN] {
    let mut out = [0u8; INT_ENCODED_LEN];
    let bytes = value.to_be_bytes();
    out[0] = bytes
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, &b)| acc | ((b >> 7) << i));
    for (i, &b) in bytes.iter().enumerate() {
        out[1 + i] = b & 0x7F;
    }
    out
}

pub fn decode_u32(sysex: &[u8]) -> Result<u32, CodecError> {
    if sysex.len() != INT_ENCODED_LEN {
        return Err(CodecError::MalformedEncoding { offset: sysex.len().min(INT_ENCODED_LEN) });
    }
    let mut bytes = Vec::with_capacity(4);
    decode_into(sysex, &mut bytes)?;
    let bytes: [u8; 4] = bytes
        .try_into()
        .map_err(|_| CodecError::MalformedEncoding { offset: 0 })?;
    Ok(u32::from_be_bytes(bytes))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_vectors() {
        assert_eq!(encode(&[]), Vec::<u8>::new());
        assert_eq!(encode(&[0xFF]), vec![0x01, 0x7F]);
        assert_eq!(encode(&[0x00, 0x80]), vec![0x02, 0x00, 0x00]);
        assert_eq!(
            encode(&[0x81, 0x02, 0x83, 0x04, 0x85, 0x06, 0x87]),
            vec![0x55, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]
        );
        assert_eq!(
            encode(&[0x80; 8]),
            vec![0x7F, 0, 0, 0, 0, 0, 0, 0, 0x01, 0x00]
        );
    }

    #[test]
    fn test_encoded_and_decoded_len() {
        assert_eq!(encoded_len(0), 0);
        assert_eq!(encoded_len(1), 2);
        assert_eq!(encoded_len(7), 8);
        assert_eq!(encoded_len(8), 10);
        assert_eq!(encoded_len(56), 64);
        assert_eq!(decoded_len(64), 56);
        assert_eq!(decoded_len(10), 8);
        assert_eq!(decoded_len(5), 4);
        assert_eq!(decoded_len(0), 0);
    }

    #[test]
    fn test_u32_fields() {
        assert_eq!(encode_u32(0x12345678), [0x00, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(encode_u32(0x80000001), [0x01, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(encode_u32(0xFFFFFFFF), [0x0F, 0x7F, 0x7F, 0x7F, 0x7F]);
        assert_eq!(encode_u32(0xCAFEBABE).to_vec(), encode(&0xCAFEBABEu32.to_be_bytes()));
        assert_eq!(decode_u32(&encode_u32(1000)), Ok(1000));
        assert_eq!(decode_u32(&encode_u32(u32::MAX)), Ok(u32::MAX));
    }

    #[test]
    fn test_decode_u32_wrong_width() {
        assert!(decode_u32(&[0x00, 0x01, 0x02, 0x03]).is_err());
        assert!(decode_u32(&[0x00, 0x01, 0x02, 0x03, 0x04, 0x05]).is_err());
    }

    #[test]
    fn test_decode_dangling_control_byte() {
        // 7 data bytes then a lone control byte
        let mut sysex = encode(&[1, 2, 3, 4, 5, 6, 7]);
        sysex.push(0x00);
        assert_eq!(decode(&sysex), Err(CodecError::MalformedEncoding { offset: 8 }));
    }

    #[test]
    fn test_decode_control_claims_missing_bytes() {
        // control says byte 2 has its high bit set, but only 2 bytes follow
        assert_eq!(
            decode(&[0x04, 0x10, 0x20]),
            Err(CodecError::MalformedEncoding { offset: 0 })
        );
    }

    #[test]
    fn test_decode_rejects_high_bit_data() {
        assert_eq!(
            decode(&[0x00, 0x10, 0x90]),
            Err(CodecError::MalformedEncoding { offset: 2 })
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
                let sysex = encode(&data);
                prop_assert_eq!(sysex.len(), encoded_len(data.len()));
                prop_assert!(sysex.iter().all(|&b| b < 0x80));
                prop_assert_eq!(decode(&sysex).unwrap(), data);
            }

            #[test]
            fn prop_four_bytes_expand_to_five(value in any::<u32>()) {
                let sysex = encode(&value.to_be_bytes());
                prop_assert_eq!(sysex.len(), 5);
                prop_assert_eq!(decode_u32(&sysex).unwrap(), value);
            }
        }
    }
}
