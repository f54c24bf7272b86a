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

use std::marker::PhantomData;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use crate::action::PostUploadAction;
use crate::checksum::Checksum;
use crate::frame::FrameBuilder;
use crate::link::TransportLink;
use crate::planner::{binary_chunk_len, plan_parts, ChunkPlan};
use crate::protocol::*;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("Transfer complete")]
    TransferComplete,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub device_id: u8,
    /// SysEx bytes available to a chunk in each message
    pub max_payload: usize,
    pub frame_delay: Duration,
    pub part_size: Option<usize>,
    pub slot_size: u32,
    pub action: Option<PostUploadAction>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            device_id: OMNI_DEVICE,
            max_payload: DEFAULT_MESSAGE_SIZE - MESSAGE_OVERHEAD,
            frame_delay: SenderConfig::default_frame_delay(true),
            part_size: None,
            slot_size: DEFAULT_SLOT_SIZE,
            action: None,
        }
    }
}

impl SenderConfig {
    /// Frame delay used when none is given: serial MIDI needs time to drain,
    /// a file does not.
    pub fn default_frame_delay(to_port: bool) -> Duration {
        if to_port {
            Duration::from_millis(DEFAULT_FRAME_DELAY_MS)
        } else {
            Duration::ZERO
        }
    }

    pub fn validate(&self) -> Result<(), SenderError> {
        if binary_chunk_len(self.max_payload) == 0 {
            return Err(SenderError::InvalidConfig(format!(
                "SysEx payload of {} bytes cannot carry any data",
                self.max_payload
            )));
        }
        if self.device_id > 0x7F {
            return Err(SenderError::InvalidConfig(format!("device id {} is not 7-bit", self.device_id)));
        }
        if self.part_size == Some(0) {
            return Err(SenderError::InvalidConfig("part size must be non-zero".to_string()));
        }
        if self.slot_size == 0 {
            return Err(SenderError::InvalidConfig("slot size must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// States
// ============================================================================

pub struct BeginPart;
pub struct SendChunk;
pub struct SendChecksum;
pub struct SendAction;
pub struct EndPart;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    link: Box<dyn TransportLink>,
    builder: FrameBuilder,
    image: Vec<u8>,
    parts: Vec<Range<usize>>,
    part_idx: usize,
    plan: ChunkPlan,
    chunk_idx: usize,
    checksum: Checksum,
    chunk_len: usize,
    slot_step: u32,
    action: Option<PostUploadAction>,
    frame_delay: Duration,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            link: self.link,
            builder: self.builder,
            image: self.image,
            parts: self.parts,
            part_idx: self.part_idx,
            plan: self.plan,
            chunk_idx: self.chunk_idx,
            checksum: self.checksum,
            chunk_len: self.chunk_len,
            slot_step: self.slot_step,
            action: self.action,
            frame_delay: self.frame_delay,
        })
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), SenderError> {
        self.link.send_frame(frame).map_err(|e| self.io_error(e))
    }

    fn pause(&self) {
        if !self.frame_delay.is_zero() {
            std::thread::sleep(self.frame_delay);
        }
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<BeginPart> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        if fsm.part_idx > 0 {
            fsm.link.next_part().map_err(|e| fsm.io_error(e))?;
        }

        let part = fsm.parts[fsm.part_idx].clone();
        fsm.plan = ChunkPlan::new(part.len(), fsm.chunk_len);
        fsm.chunk_idx = 0;
        fsm.checksum.reset();

        if fsm.parts.len() > 1 {
            info!("Sending part {} of {}: {} bytes", fsm.part_idx + 1, fsm.parts.len(), part.len());
        } else {
            info!("Sending {} bytes", part.len());
        }
        let header = fsm.builder.upload_header(part.len() as u32);
        fsm.send(&header)?;
        debug!("Sent: header, {} data frames follow", fsm.plan.len());

        if fsm.plan.is_empty() {
            let next = fsm.transition::<SendChecksum>();
            Ok(next as Box<dyn SenderState>)
        } else {
            let next = fsm.transition::<SendChunk>();
            Ok(next as Box<dyn SenderState>)
        }
    }
}

impl SenderState for SenderFsm<SendChunk> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        let part_start = fsm.parts[fsm.part_idx].start;
        let chunk = fsm
            .plan
            .get(fsm.chunk_idx)
            .map(|(seq, range)| (*seq, part_start + range.start..part_start + range.end));
        let Some((seq, range)) = chunk else {
            let next = fsm.transition::<SendChecksum>();
            return Ok(next as Box<dyn SenderState>);
        };

        let data = &fsm.image[range.clone()];
        fsm.checksum.update(data);
        let frame = fsm.builder.upload_chunk(seq, data);
        fsm.send(&frame)?;
        debug!(
            "Sent: frame {}, {}/{} bytes binary/sysex (total {} of {})",
            seq,
            range.len(),
            frame.len() - HEADER_LEN - INT_ENCODED_LEN,
            range.end - part_start,
            fsm.parts[fsm.part_idx].len()
        );
        fsm.pause();

        fsm.chunk_idx += 1;
        if fsm.chunk_idx >= fsm.plan.len() {
            let next = fsm.transition::<SendChecksum>();
            Ok(next as Box<dyn SenderState>)
        } else {
            Ok(Box::new(fsm) as Box<dyn SenderState>)
        }
    }
}

impl SenderState for SenderFsm<SendChecksum> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        let crc = fsm.checksum.value();
        let frame = fsm.builder.upload_checksum(fsm.plan.checksum_sequence(), crc);
        fsm.send(&frame)?;
        fsm.pause();
        info!("Checksum 0x{:08x}", crc);

        if fsm.action.is_some() {
            let next = fsm.transition::<SendAction>();
            Ok(next as Box<dyn SenderState>)
        } else {
            let next = fsm.transition::<EndPart>();
            Ok(next as Box<dyn SenderState>)
        }
    }
}

impl SenderState for SenderFsm<SendAction> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        if let Some(action) = fsm.action.clone() {
            let frame = fsm.builder.action(&action);
            fsm.send(&frame)?;
            info!("Sent command: {}", action);
        }
        let next = fsm.transition::<EndPart>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<EndPart> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        fsm.part_idx += 1;
        if fsm.part_idx >= fsm.parts.len() {
            return Err(SenderError::TransferComplete);
        }

        let step = fsm.slot_step;
        if let Some(PostUploadAction::Store { slot }) = fsm.action.as_mut() {
            let current = *slot;
            *slot = current
                .checked_add(step)
                .ok_or_else(|| SenderError::InvalidConfig(format!("store slot {} + {} overflows", current, step)))?;
        }
        let next = fsm.transition::<BeginPart>();
        Ok(next as Box<dyn SenderState>)
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl SenderFsm<BeginPart> {
    pub fn new(
        link: Box<dyn TransportLink>,
        image: Vec<u8>,
        config: SenderConfig,
    ) -> Result<Box<dyn SenderState>, SenderError> {
        config.validate()?;
        let parts = plan_parts(image.len(), config.part_size);
        if parts.iter().any(|p| p.len() > u32::MAX as usize) {
            return Err(SenderError::InvalidConfig(format!(
                "{} byte image needs a part size below 4 GiB",
                image.len()
            )));
        }

        let slot_step = if parts.len() > 1 {
            let part_size = config.part_size.unwrap_or(0);
            u32::try_from(part_size / config.slot_size as usize).map_err(|_| {
                SenderError::InvalidConfig(format!("part size {} spans too many slots", part_size))
            })?
        } else {
            0
        };
        if let Some(PostUploadAction::Store { slot }) = &config.action {
            let last = u32::try_from(parts.len() - 1)
                .ok()
                .and_then(|n| n.checked_mul(slot_step))
                .and_then(|offset| slot.checked_add(offset));
            if last.is_none() {
                return Err(SenderError::InvalidConfig(format!(
                    "store slot {} overflows across {} parts",
                    slot,
                    parts.len()
                )));
            }
        }

        Ok(Box::new(SenderFsm {
            state: PhantomData::<BeginPart>,
            link,
            builder: FrameBuilder::new(MANUFACTURER_ID, config.device_id),
            image,
            parts,
            part_idx: 0,
            plan: ChunkPlan::new(0, 1),
            chunk_idx: 0,
            checksum: Checksum::new(),
            chunk_len: binary_chunk_len(config.max_payload),
            slot_step,
            action: config.action,
            frame_delay: config.frame_delay,
        }))
    }
}

/// Steps the sender until every part is sent. `running` is checked between
/// frames; clearing it stops the transfer without sending anything further.
pub fn run(mut state: Box<dyn SenderState>, running: &AtomicBool) -> Result<(), SenderError> {
    loop {
        if !running.load(Ordering::SeqCst) {
            return Err(SenderError::Cancelled);
        }
        match state.step() {
            Ok(next) => state = next,
            Err(SenderError::TransferComplete) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
