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

//! Device command sent after an upload completes

use std::fmt;
use thiserror::Error;
use crate::codec::{self, CodecError};
use crate::frame::Frame;
use crate::protocol::{CommandId, INT_ENCODED_LEN};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("resource name must not be empty")]
    EmptyName,
    #[error("resource name must be ASCII without NUL: {0:?}")]
    InvalidName(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostUploadAction {
    /// Store the uploaded image in a numbered slot
    Store { slot: u32 },
    /// Save the uploaded image as a named resource
    Save { name: String },
    /// Start the uploaded program
    Run,
    /// Flash the uploaded firmware, guarded by its checksum
    Flash { checksum: u32 },
}

impl PostUploadAction {
    /// Builds a save action; names travel as raw bytes so they must be
    /// 7-bit clean and NUL free.
    pub fn save(name: &str) -> Result<Self, ActionError> {
        if name.is_empty() {
            return Err(ActionError::EmptyName);
        }
        if !name.bytes().all(|b| b.is_ascii() && b != 0) {
            return Err(ActionError::InvalidName(name.to_string()));
        }
        Ok(PostUploadAction::Save { name: name.to_string() })
    }

    pub fn command(&self) -> CommandId {
        match self {
            PostUploadAction::Store { .. } => CommandId::FirmwareStore,
            PostUploadAction::Save { .. } => CommandId::FirmwareSave,
            PostUploadAction::Run => CommandId::FirmwareRun,
            PostUploadAction::Flash { .. } => CommandId::FirmwareFlash,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            PostUploadAction::Store { slot } => codec::encode_u32(*slot).to_vec(),
            PostUploadAction::Save { name } => {
                let mut payload = Vec::with_capacity(name.len() + 1);
                payload.extend_from_slice(name.as_bytes());
                payload.push(0);
                payload
            }
            PostUploadAction::Run => Vec::new(),
            PostUploadAction::Flash { checksum } => codec::encode_u32(*checksum).to_vec(),
        }
    }

    /// Decodes a non-upload frame. Returns `None` for `FirmwareUpload`.
    pub fn from_frame(frame: &Frame) -> Option<Result<Self, CodecError>> {
        let payload = &frame.payload;
        let action = match frame.command {
            CommandId::FirmwareUpload => return None,
            CommandId::FirmwareStore => int_field(payload).map(|slot| PostUploadAction::Store { slot }),
            CommandId::FirmwareFlash => {
                int_field(payload).map(|checksum| PostUploadAction::Flash { checksum })
            }
            CommandId::FirmwareRun => Ok(PostUploadAction::Run),
            CommandId::FirmwareSave => save_name(payload).map(|name| PostUploadAction::Save { name }),
        };
        Some(action)
    }
}

impl fmt::Display for PostUploadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostUploadAction::Store { slot } => write!(f, "store in slot {}", slot),
            PostUploadAction::Save { name } => write!(f, "save as '{}'", name),
            PostUploadAction::Run => write!(f, "run"),
            PostUploadAction::Flash { checksum } => write!(f, "flash with checksum 0x{:08x}", checksum),
        }
    }
}

fn int_field(payload: &[u8]) -> Result<u32, CodecError> {
    codec::decode_u32(payload.get(..INT_ENCODED_LEN).unwrap_or(payload))
}

fn save_name(payload: &[u8]) -> Result<String, CodecError> {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or(CodecError::MalformedEncoding { offset: payload.len() })?;
    let name = &payload[..end];
    if let Some(offset) = name.iter().position(|b| !b.is_ascii()) {
        return Err(CodecError::MalformedEncoding { offset });
    }
    Ok(String::from_utf8_lossy(name).into_owned())
}
