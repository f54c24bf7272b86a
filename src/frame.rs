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

//! Single SysEx message: 3-byte header plus command payload.
//!
//! Frames handled here never include the SysEx start/end delimiters; those
//! belong to the transport link.

use thiserror::Error;
use crate::action::PostUploadAction;
use crate::codec;
use crate::protocol::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("unrecognized sender: manufacturer {manufacturer:#04x}, device {device:#04x}")]
    UnrecognizedSender { manufacturer: u8, device: u8 },
    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub manufacturer_id: u8,
    pub device_id: u8,
    pub command: CommandId,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&[self.manufacturer_id, self.device_id, self.command.as_byte()]);
        out.extend_from_slice(&self.payload);
        out
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Produces raw frames addressed to one device.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuilder {
    manufacturer_id: u8,
    device_id: u8,
}

impl FrameBuilder {
    pub fn new(manufacturer_id: u8, device_id: u8) -> Self {
        FrameBuilder { manufacturer_id, device_id }
    }

    pub fn build(&self, command: CommandId, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&[self.manufacturer_id, self.device_id, command.as_byte()]);
        out.extend_from_slice(payload);
        out
    }

    /// Sequence 0: declared size of the transfer.
    pub fn upload_header(&self, size: u32) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 * INT_ENCODED_LEN);
        payload.extend_from_slice(&codec::encode_u32(0));
        payload.extend_from_slice(&codec::encode_u32(size));
        self.build(CommandId::FirmwareUpload, &payload)
    }

    pub fn upload_chunk(&self, sequence: u32, data: &[u8]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(INT_ENCODED_LEN + codec::encoded_len(data.len()));
        payload.extend_from_slice(&codec::encode_u32(sequence));
        codec::encode_into(data, &mut payload);
        self.build(CommandId::FirmwareUpload, &payload)
    }

    pub fn upload_checksum(&self, sequence: u32, checksum: u32) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 * INT_ENCODED_LEN);
        payload.extend_from_slice(&codec::encode_u32(sequence));
        payload.extend_from_slice(&codec::encode_u32(checksum));
        self.build(CommandId::FirmwareUpload, &payload)
    }

    pub fn action(&self, action: &PostUploadAction) -> Vec<u8> {
        self.build(action.command(), &action.encode_payload())
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Which device ids a parser accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFilter {
    Any,
    /// A specific id; frames sent to `OMNI_DEVICE` are accepted as well.
    Only(u8),
}

impl DeviceFilter {
    fn accepts(&self, device: u8) -> bool {
        match self {
            DeviceFilter::Any => true,
            DeviceFilter::Only(id) => device == *id || device == OMNI_DEVICE,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameParser {
    manufacturer_id: u8,
    device: DeviceFilter,
}

impl FrameParser {
    pub fn new(manufacturer_id: u8, device: DeviceFilter) -> Self {
        FrameParser { manufacturer_id, device }
    }

    pub fn parse(&self, raw: &[u8]) -> Result<Frame, FrameError> {
        if raw.len() < HEADER_LEN {
            return Err(FrameError::TooShort { len: raw.len() });
        }
        let (manufacturer, device) = (raw[0], raw[1]);
        if manufacturer != self.manufacturer_id || !self.device.accepts(device) {
            return Err(FrameError::UnrecognizedSender { manufacturer, device });
        }
        let command = CommandId::try_from(raw[2]).map_err(FrameError::UnknownCommand)?;

        Ok(Frame {
            manufacturer_id: manufacturer,
            device_id: device,
            command,
            payload: raw[HEADER_LEN..].to_vec(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_layout() {
        let builder = FrameBuilder::new(MANUFACTURER_ID, OMNI_DEVICE);
        let raw = builder.upload_header(1000);
        assert_eq!(&raw[..3], &[0x7D, 0x7F, 0x10]);
        assert_eq!(raw.len(), HEADER_LEN + 2 * INT_ENCODED_LEN);
        assert_eq!(&raw[3..8], &codec::encode_u32(0));
        assert_eq!(&raw[8..13], &codec::encode_u32(1000));

        let raw = builder.upload_chunk(3, &[0xFF; 56]);
        assert_eq!(raw.len(), HEADER_LEN + INT_ENCODED_LEN + 64);
        assert!(raw.iter().all(|&b| b < 0x80));
    }

    #[test]
    fn test_parse_roundtrip() {
        let builder = FrameBuilder::new(MANUFACTURER_ID, OWL_DEVICE);
        let parser = FrameParser::new(MANUFACTURER_ID, DeviceFilter::Only(OWL_DEVICE));

        let frame = parser.parse(&builder.upload_checksum(7, 0xDEADBEEF)).unwrap();
        assert_eq!(frame.command, CommandId::FirmwareUpload);
        assert_eq!(frame.device_id, OWL_DEVICE);
        assert_eq!(codec::decode_u32(&frame.payload[..5]), Ok(7));
        assert_eq!(codec::decode_u32(&frame.payload[5..]), Ok(0xDEADBEEF));
        assert_eq!(frame.to_bytes(), builder.upload_checksum(7, 0xDEADBEEF));
    }

    #[test]
    fn test_parse_too_short() {
        let parser = FrameParser::new(MANUFACTURER_ID, DeviceFilter::Any);
        assert_eq!(parser.parse(&[0x7D, 0x7F]), Err(FrameError::TooShort { len: 2 }));
    }

    #[test]
    fn test_parse_addressing() {
        let parser = FrameParser::new(MANUFACTURER_ID, DeviceFilter::Only(OWL_DEVICE));

        assert_eq!(
            parser.parse(&[0x43, OWL_DEVICE, 0x10]),
            Err(FrameError::UnrecognizedSender { manufacturer: 0x43, device: OWL_DEVICE })
        );
        assert_eq!(
            parser.parse(&[MANUFACTURER_ID, 0x01, 0x10]),
            Err(FrameError::UnrecognizedSender { manufacturer: MANUFACTURER_ID, device: 0x01 })
        );
        assert!(parser.parse(&[MANUFACTURER_ID, OMNI_DEVICE, 0x11]).is_ok());

        let any = FrameParser::new(MANUFACTURER_ID, DeviceFilter::Any);
        assert!(any.parse(&[MANUFACTURER_ID, 0x01, 0x11]).is_ok());
    }

    #[test]
    fn test_parse_unknown_command() {
        let parser = FrameParser::new(MANUFACTURER_ID, DeviceFilter::Any);
        assert_eq!(
            parser.parse(&[MANUFACTURER_ID, OMNI_DEVICE, 0x13, 0x00]),
            Err(FrameError::UnknownCommand(0x13))
        );
    }
}
