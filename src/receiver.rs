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

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use crate::action::PostUploadAction;
use crate::frame::{DeviceFilter, FrameParser};
use crate::link::TransportLink;
use crate::protocol::*;
use crate::session::{SessionEvent, TransferSession};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("receive cancelled")]
    Cancelled,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub device: DeviceFilter,
    pub capacity: usize,
    /// How long a single wait for the next frame may block
    pub poll_interval: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            device: DeviceFilter::Any,
            capacity: DEFAULT_CAPACITY,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// A completed upload and any device commands seen while receiving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedImage {
    pub data: Vec<u8>,
    pub checksum: u32,
    pub actions: Vec<PostUploadAction>,
}

// ============================================================================
// Receiver
// ============================================================================

pub struct Receiver {
    link: Box<dyn TransportLink>,
    parser: FrameParser,
    session: TransferSession,
    poll_interval: Duration,
}

impl Receiver {
    pub fn new(link: Box<dyn TransportLink>, config: ReceiverConfig) -> Self {
        Receiver {
            link,
            parser: FrameParser::new(MANUFACTURER_ID, config.device),
            session: TransferSession::new(config.capacity),
            poll_interval: config.poll_interval,
        }
    }

    pub fn session(&self) -> &TransferSession {
        &self.session
    }

    /// Waits for one frame and feeds it to the session. Foreign SysEx traffic
    /// and failed transfers are logged and yield `None`; only link errors are
    /// returned as errors.
    pub fn poll(&mut self) -> Result<Option<SessionEvent>, ReceiverError> {
        let raw = match self.link.recv_frame(self.poll_interval)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let frame = match self.parser.parse(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Ignoring SysEx message: {}", e);
                return Ok(None);
            }
        };

        match self.session.advance(&frame) {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                warn!("Receive error: {}", e);
                Ok(None)
            }
        }
    }

    /// Receives until one image completes. `running` is checked between frames.
    pub fn run(&mut self, running: &AtomicBool) -> Result<ReceivedImage, ReceiverError> {
        let mut actions = Vec::new();
        loop {
            if !running.load(Ordering::SeqCst) {
                return Err(ReceiverError::Cancelled);
            }
            match self.poll()? {
                Some(SessionEvent::Started { declared_size }) => {
                    debug!("Transfer started, {} bytes declared", declared_size);
                }
                Some(SessionEvent::Progress { received, declared_size }) => {
                    debug!("Received {} of {} bytes", received, declared_size);
                }
                Some(SessionEvent::Action(action)) => {
                    info!("Device command: {}", action);
                    actions.push(action);
                }
                Some(SessionEvent::Completed { checksum, .. }) => {
                    let data = self.session.take_image().unwrap_or_default();
                    return Ok(ReceivedImage { data, checksum, actions });
                }
                None => {}
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
