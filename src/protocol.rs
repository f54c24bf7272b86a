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

//! Firmware SysEx protocol constants

/// Start of a System Exclusive message
pub const SYSEX_START: u8 = 0xF0;

/// End of a System Exclusive message
pub const SYSEX_END: u8 = 0xF7;

/// First system real-time status byte. Real-time bytes may appear in the
/// middle of a SysEx message on a live wire and do not terminate it.
pub const REALTIME_FIRST: u8 = 0xF8;

/// Manufacturer id (non-commercial / educational range)
pub const MANUFACTURER_ID: u8 = 0x7D;

/// Device id addressing every device on the bus
pub const OMNI_DEVICE: u8 = 0x7F;

/// Device id of a single audio-effects unit
pub const OWL_DEVICE: u8 = 0x52;

/// Header length: manufacturer id, device id, command id
pub const HEADER_LEN: usize = 3;

/// Encoded width of every integer field (4 bytes big-endian -> 5 SysEx bytes)
pub const INT_ENCODED_LEN: usize = 5;

/// Bytes of each SysEx message not available to chunk payload
pub const MESSAGE_OVERHEAD: usize = 8;

/// Default size of a whole SysEx message on the wire
pub const DEFAULT_MESSAGE_SIZE: usize = 248;

/// Default wait between messages when writing to a live port
pub const DEFAULT_FRAME_DELAY_MS: u64 = 20;

/// Default size of a storage slot on the device
pub const DEFAULT_SLOT_SIZE: u32 = 128 * 1024;

/// Default upper bound on a reassembled image
pub const DEFAULT_CAPACITY: usize = 8 * 1024 * 1024;

/// Command byte carried in the third header position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    FirmwareUpload = 0x10,
    FirmwareRun = 0x11,
    FirmwareStore = 0x12,
    FirmwareFlash = 0x16,
    FirmwareSave = 0x1A,
}

impl CommandId {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CommandId {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x10 => Ok(CommandId::FirmwareUpload),
            0x11 => Ok(CommandId::FirmwareRun),
            0x12 => Ok(CommandId::FirmwareStore),
            0x16 => Ok(CommandId::FirmwareFlash),
            0x1A => Ok(CommandId::FirmwareSave),
            other => Err(other),
        }
    }
}
