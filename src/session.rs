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

//! Receiver-side reassembly of a chunked upload.
//!
//! A transfer is `seq 0` (declared size), data frames until the declared
//! byte count is reached, then one frame carrying the CRC-32. There is no
//! terminal marker: the frame after the last data byte is the checksum.

use thiserror::Error;
use tracing::{debug, info};
use crate::action::PostUploadAction;
use crate::checksum::Checksum;
use crate::codec::{self, CodecError};
use crate::frame::Frame;
use crate::protocol::INT_ENCODED_LEN;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error(transparent)]
    Malformed(#[from] CodecError),
    #[error("sequence gap: expected frame {expected}, got {found}")]
    SequenceGap { expected: u32, found: u32 },
    #[error("checksum mismatch: sender 0x{expected:08x}, computed 0x{computed:08x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
    #[error("transfer of {size} bytes exceeds capacity of {capacity} bytes")]
    CapacityExceeded { size: usize, capacity: usize },
    #[error("size mismatch: declared {declared} bytes, received {received}")]
    DeclaredSizeMismatch { declared: usize, received: usize },
    #[error("frame {sequence} arrived with no transfer in progress")]
    NotReceiving { sequence: u32 },
}

// ============================================================================
// States and Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Receiving,
    Completed,
    Failed(TransferError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Started { declared_size: usize },
    Progress { received: usize, declared_size: usize },
    Completed { size: usize, checksum: u32 },
    Action(PostUploadAction),
}

// ============================================================================
// Session
// ============================================================================

pub struct TransferSession {
    capacity: usize,
    phase: Phase,
    sequence_expected: u32,
    declared_size: Option<usize>,
    buffer: Vec<u8>,
    checksum: Checksum,
}

impl TransferSession {
    pub fn new(capacity: usize) -> Self {
        TransferSession {
            capacity,
            phase: Phase::Idle,
            sequence_expected: 0,
            declared_size: None,
            buffer: Vec::new(),
            checksum: Checksum::new(),
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// The finished image, once the session has completed.
    pub fn image(&self) -> Option<&[u8]> {
        match self.phase {
            Phase::Completed => Some(&self.buffer),
            _ => None,
        }
    }

    pub fn take_image(&mut self) -> Option<Vec<u8>> {
        match self.phase {
            Phase::Completed => Some(std::mem::take(&mut self.buffer)),
            _ => None,
        }
    }

    /// Feeds one parsed frame through the state machine.
    pub fn advance(&mut self, frame: &Frame) -> Result<SessionEvent, TransferError> {
        if let Some(action) = PostUploadAction::from_frame(frame) {
            return Ok(SessionEvent::Action(action?));
        }

        let payload = &frame.payload;
        if payload.len() < INT_ENCODED_LEN {
            let err = CodecError::MalformedEncoding { offset: payload.len() };
            return Err(self.fail(err.into()));
        }
        let sequence = match codec::decode_u32(&payload[..INT_ENCODED_LEN]) {
            Ok(seq) => seq,
            Err(e) => return Err(self.fail(e.into())),
        };
        let body = &payload[INT_ENCODED_LEN..];

        if sequence == 0 {
            return self.start(body);
        }
        if self.phase != Phase::Receiving {
            return Err(TransferError::NotReceiving { sequence });
        }
        if sequence != self.sequence_expected {
            let err = TransferError::SequenceGap { expected: self.sequence_expected, found: sequence };
            return Err(self.fail(err));
        }
        self.sequence_expected += 1;

        let declared_size = self.declared_size.unwrap_or(0);
        if self.buffer.len() < declared_size {
            self.append(body, declared_size)
        } else {
            self.verify(body)
        }
    }

    fn start(&mut self, body: &[u8]) -> Result<SessionEvent, TransferError> {
        // a new transfer always preempts whatever came before
        self.phase = Phase::Receiving;
        self.buffer = Vec::new();
        self.checksum.reset();
        self.sequence_expected = 1;
        self.declared_size = None;

        let size = match body.get(..INT_ENCODED_LEN).map(codec::decode_u32) {
            Some(Ok(size)) => size as usize,
            Some(Err(e)) => return Err(self.fail(e.into())),
            None => {
                let err = CodecError::MalformedEncoding { offset: INT_ENCODED_LEN + body.len() };
                return Err(self.fail(err.into()));
            }
        };
        if size > self.capacity {
            let err = TransferError::CapacityExceeded { size, capacity: self.capacity };
            return Err(self.fail(err));
        }

        self.buffer.reserve_exact(size);
        self.declared_size = Some(size);
        info!("Receiving {} bytes", size);
        Ok(SessionEvent::Started { declared_size: size })
    }

    fn append(&mut self, body: &[u8], declared_size: usize) -> Result<SessionEvent, TransferError> {
        let start = self.buffer.len();
        let bound = start + codec::decoded_len(body.len());
        if bound > self.capacity {
            let err = TransferError::CapacityExceeded { size: bound, capacity: self.capacity };
            return Err(self.fail(err));
        }
        if let Err(e) = codec::decode_into(body, &mut self.buffer) {
            return Err(self.fail(e.into()));
        }

        let received = self.buffer.len();
        if received > declared_size {
            let err = TransferError::DeclaredSizeMismatch { declared: declared_size, received };
            return Err(self.fail(err));
        }
        self.checksum.update(&self.buffer[start..]);
        debug!("frame {}: {} of {} bytes", self.sequence_expected - 1, received, declared_size);
        Ok(SessionEvent::Progress { received, declared_size })
    }

    fn verify(&mut self, body: &[u8]) -> Result<SessionEvent, TransferError> {
        if body.len() < INT_ENCODED_LEN {
            let err = CodecError::MalformedEncoding { offset: INT_ENCODED_LEN + body.len() };
            return Err(self.fail(err.into()));
        }
        let expected = match codec::decode_u32(&body[body.len() - INT_ENCODED_LEN..]) {
            Ok(value) => value,
            Err(e) => return Err(self.fail(e.into())),
        };
        let computed = self.checksum.value();
        if expected != computed {
            return Err(self.fail(TransferError::ChecksumMismatch { expected, computed }));
        }

        self.phase = Phase::Completed;
        info!("Received {} bytes, checksum 0x{:08x}", self.buffer.len(), computed);
        Ok(SessionEvent::Completed { size: self.buffer.len(), checksum: computed })
    }

    /// Terminates an active transfer. Terminal sessions are left as they
    /// are and only the error is passed back.
    fn fail(&mut self, err: TransferError) -> TransferError {
        if self.phase == Phase::Receiving {
            self.buffer = Vec::new();
            self.declared_size = None;
            self.phase = Phase::Failed(err.clone());
        }
        err
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;
    use crate::frame::{DeviceFilter, FrameBuilder, FrameParser};
    use crate::protocol::*;

    fn frames(image: &[u8], chunk: usize, crc: u32) -> Vec<Frame> {
        let builder = FrameBuilder::new(MANUFACTURER_ID, OMNI_DEVICE);
        let mut raw = vec![builder.upload_header(image.len() as u32)];
        let mut seq = 1;
        for part in image.chunks(chunk) {
            raw.push(builder.upload_chunk(seq, part));
            seq += 1;
        }
        raw.push(builder.upload_checksum(seq, crc));
        raw.iter().map(|r| parse(r)).collect()
    }

    fn parse(raw: &[u8]) -> Frame {
        FrameParser::new(MANUFACTURER_ID, DeviceFilter::Any).parse(raw).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn test_happy_path() {
        let image = pattern(500);
        let mut session = TransferSession::new(DEFAULT_CAPACITY);
        let frames = frames(&image, 56, checksum(&image));

        assert_eq!(session.advance(&frames[0]), Ok(SessionEvent::Started { declared_size: 500 }));
        for frame in &frames[1..frames.len() - 1] {
            assert!(matches!(session.advance(frame), Ok(SessionEvent::Progress { .. })));
            assert_eq!(session.phase(), &Phase::Receiving);
        }
        assert_eq!(
            session.advance(frames.last().unwrap()),
            Ok(SessionEvent::Completed { size: 500, checksum: checksum(&image) })
        );
        assert_eq!(session.phase(), &Phase::Completed);
        assert_eq!(session.image(), Some(&image[..]));
        assert_eq!(session.take_image(), Some(image));
    }

    #[test]
    fn test_empty_image() {
        let mut session = TransferSession::new(16);
        let frames = frames(&[], 56, 0);
        assert_eq!(frames.len(), 2);
        session.advance(&frames[0]).unwrap();
        assert_eq!(
            session.advance(&frames[1]),
            Ok(SessionEvent::Completed { size: 0, checksum: 0 })
        );
    }

    #[test]
    fn test_sequence_gap() {
        let image = pattern(200);
        let mut session = TransferSession::new(DEFAULT_CAPACITY);
        let frames = frames(&image, 56, checksum(&image));

        session.advance(&frames[0]).unwrap();
        session.advance(&frames[1]).unwrap();
        assert_eq!(session.received(), 56);

        let err = TransferError::SequenceGap { expected: 2, found: 3 };
        assert_eq!(session.advance(&frames[3]), Err(err.clone()));
        assert_eq!(session.phase(), &Phase::Failed(err));
        assert_eq!(session.received(), 0);

        // failed sessions stay failed until a new transfer begins
        assert_eq!(session.advance(&frames[2]), Err(TransferError::NotReceiving { sequence: 2 }));
        assert!(matches!(session.phase(), Phase::Failed(_)));
    }

    #[test]
    fn test_gap_on_second_frame() {
        let image = pattern(200);
        let mut session = TransferSession::new(DEFAULT_CAPACITY);
        let frames = frames(&image, 56, checksum(&image));

        session.advance(&frames[0]).unwrap();
        assert_eq!(
            session.advance(&frames[2]),
            Err(TransferError::SequenceGap { expected: 1, found: 2 })
        );
        assert_eq!(session.received(), 0);
    }

    #[test]
    fn test_duplicate_frame() {
        let image = pattern(200);
        let mut session = TransferSession::new(DEFAULT_CAPACITY);
        let frames = frames(&image, 56, checksum(&image));

        session.advance(&frames[0]).unwrap();
        session.advance(&frames[1]).unwrap();
        assert_eq!(
            session.advance(&frames[1]),
            Err(TransferError::SequenceGap { expected: 2, found: 1 })
        );
    }

    #[test]
    fn test_checksum_mismatch() {
        let image = pattern(300);
        let sent_crc = checksum(&image);
        let mut corrupted = image.clone();
        *corrupted.last_mut().unwrap() ^= 0x01;

        let mut session = TransferSession::new(DEFAULT_CAPACITY);
        let frames = frames(&corrupted, 56, sent_crc);
        for frame in &frames[..frames.len() - 1] {
            session.advance(frame).unwrap();
        }
        let err = TransferError::ChecksumMismatch { expected: sent_crc, computed: checksum(&corrupted) };
        assert_eq!(session.advance(frames.last().unwrap()), Err(err.clone()));
        assert_eq!(session.phase(), &Phase::Failed(err));
        assert_eq!(session.image(), None);
    }

    #[test]
    fn test_declared_capacity_exceeded() {
        let builder = FrameBuilder::new(MANUFACTURER_ID, OMNI_DEVICE);
        let mut session = TransferSession::new(1024);

        assert_eq!(
            session.advance(&parse(&builder.upload_header(u32::MAX))),
            Err(TransferError::CapacityExceeded { size: u32::MAX as usize, capacity: 1024 })
        );
        assert!(matches!(session.phase(), Phase::Failed(TransferError::CapacityExceeded { .. })));
        assert_eq!(session.buffer.capacity(), 0);
    }

    #[test]
    fn test_accumulated_size_overshoot() {
        let builder = FrameBuilder::new(MANUFACTURER_ID, OMNI_DEVICE);
        let mut session = TransferSession::new(1024);

        session.advance(&parse(&builder.upload_header(10))).unwrap();
        assert_eq!(
            session.advance(&parse(&builder.upload_chunk(1, &[0u8; 14]))),
            Err(TransferError::DeclaredSizeMismatch { declared: 10, received: 14 })
        );

        session.advance(&parse(&builder.upload_header(10))).unwrap();
        assert_eq!(
            session.advance(&parse(&builder.upload_chunk(1, &[0u8; 2000]))),
            Err(TransferError::CapacityExceeded { size: 2000, capacity: 1024 })
        );
    }

    #[test]
    fn test_restart_mid_transfer() {
        let first = pattern(400);
        let second: Vec<u8> = pattern(150).iter().map(|b| !b).collect();
        let mut session = TransferSession::new(DEFAULT_CAPACITY);

        let old = frames(&first, 56, checksum(&first));
        session.advance(&old[0]).unwrap();
        session.advance(&old[1]).unwrap();
        session.advance(&old[2]).unwrap();

        let new = frames(&second, 56, checksum(&second));
        assert_eq!(session.advance(&new[0]), Ok(SessionEvent::Started { declared_size: 150 }));
        assert_eq!(session.received(), 0);
        for frame in &new[1..] {
            session.advance(frame).unwrap();
        }
        assert_eq!(session.image(), Some(&second[..]));
    }

    #[test]
    fn test_restart_after_completion_and_failure() {
        let image = pattern(100);
        let good = frames(&image, 56, checksum(&image));
        let bad = frames(&image, 56, checksum(&image) ^ 1);
        let mut session = TransferSession::new(DEFAULT_CAPACITY);

        for frame in &bad {
            let _ = session.advance(frame);
        }
        assert!(matches!(session.phase(), Phase::Failed(TransferError::ChecksumMismatch { .. })));

        for frame in &good {
            session.advance(frame).unwrap();
        }
        assert_eq!(session.phase(), &Phase::Completed);

        // a completed session ignores stray data frames
        assert_eq!(session.advance(&good[1]), Err(TransferError::NotReceiving { sequence: 1 }));
        assert_eq!(session.image(), Some(&image[..]));
    }

    #[test]
    fn test_frame_before_start() {
        let image = pattern(100);
        let frames = frames(&image, 56, checksum(&image));
        let mut session = TransferSession::new(DEFAULT_CAPACITY);
        assert_eq!(session.advance(&frames[1]), Err(TransferError::NotReceiving { sequence: 1 }));
        assert_eq!(session.phase(), &Phase::Idle);
    }

    #[test]
    fn test_truncated_frames() {
        let builder = FrameBuilder::new(MANUFACTURER_ID, OMNI_DEVICE);
        let mut session = TransferSession::new(DEFAULT_CAPACITY);

        let short = parse(&builder.build(CommandId::FirmwareUpload, &[0x00, 0x00]));
        assert!(matches!(session.advance(&short), Err(TransferError::Malformed(_))));
        assert_eq!(session.phase(), &Phase::Idle);

        // header frame missing its size field
        let header = parse(&builder.build(CommandId::FirmwareUpload, &codec::encode_u32(0)));
        assert!(matches!(session.advance(&header), Err(TransferError::Malformed(_))));
        assert!(matches!(session.phase(), Phase::Failed(TransferError::Malformed(_))));
    }

    #[test]
    fn test_actions_pass_through() {
        let builder = FrameBuilder::new(MANUFACTURER_ID, OMNI_DEVICE);
        let mut session = TransferSession::new(DEFAULT_CAPACITY);
        let store = parse(&builder.action(&PostUploadAction::Store { slot: 4 }));
        assert_eq!(
            session.advance(&store),
            Ok(SessionEvent::Action(PostUploadAction::Store { slot: 4 }))
        );
        assert_eq!(session.phase(), &Phase::Idle);
    }
}
