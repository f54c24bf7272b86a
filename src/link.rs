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

use std::io;
use std::time::Duration;
use tracing::debug;
use crate::protocol::{REALTIME_FIRST, SYSEX_END, SYSEX_START};

// ============================================================================
// TransportLink Trait
// ============================================================================

/// Moves whole frames (SysEx delimiters excluded) to and from a peer.
pub trait TransportLink: Send {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Waits up to `timeout` for the next frame; `None` when nothing arrived.
    fn recv_frame(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Called between independently sequenced transfer parts.
    fn next_part(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn wrap_sysex(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 2);
    out.push(SYSEX_START);
    out.extend_from_slice(frame);
    out.push(SYSEX_END);
    out
}

// ============================================================================
// SysEx Assembler
// ============================================================================

/// Extracts SysEx message bodies from a raw MIDI byte stream.
pub struct SysexAssembler {
    buffer: Vec<u8>,
    in_message: bool,
    max_len: usize,
}

impl SysexAssembler {
    pub fn new(max_len: usize) -> Self {
        SysexAssembler {
            buffer: Vec::new(),
            in_message: false,
            max_len,
        }
    }

    /// Feeds one byte, returning a message body when `SYSEX_END` closes one.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        match byte {
            SYSEX_START => {
                if self.in_message {
                    debug!("SysEx restarted after {} bytes", self.buffer.len());
                }
                self.buffer.clear();
                self.in_message = true;
                None
            }
            SYSEX_END if self.in_message => {
                self.in_message = false;
                Some(std::mem::take(&mut self.buffer))
            }
            b if b >= REALTIME_FIRST => None,
            b if b & 0x80 != 0 => {
                if self.in_message {
                    debug!("SysEx aborted by status byte 0x{:02X}", b);
                    self.in_message = false;
                    self.buffer.clear();
                }
                None
            }
            b if self.in_message => {
                if self.buffer.len() >= self.max_len {
                    debug!("SysEx longer than {} bytes dropped", self.max_len);
                    self.in_message = false;
                    self.buffer.clear();
                } else {
                    self.buffer.push(b);
                }
                None
            }
            _ => None,
        }
    }
}

// ============================================================================
// Fan-out Link
// ============================================================================

/// Sends every frame to each inner link, e.g. a live port and a file.
pub struct FanOut {
    links: Vec<Box<dyn TransportLink>>,
}

impl FanOut {
    pub fn new(links: Vec<Box<dyn TransportLink>>) -> Self {
        FanOut { links }
    }
}

impl TransportLink for FanOut {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        for link in self.links.iter_mut() {
            link.send_frame(frame)?;
        }
        Ok(())
    }

    fn recv_frame(&mut self, _timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "fan-out link is send only"))
    }

    fn next_part(&mut self) -> io::Result<()> {
        for link in self.links.iter_mut() {
            link.next_part()?;
        }
        Ok(())
    }
}

// ============================================================================
// Mock Link for Testing
// ============================================================================

#[cfg(test)]
pub use mock::MockLink;

#[cfg(test)]
mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Records sent frames and replays scripted incoming ones.
    pub struct MockLink {
        // None = timeout
        incoming: VecDeque<Option<Vec<u8>>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        parts: Arc<Mutex<usize>>,
    }

    impl MockLink {
        pub fn new(incoming: Vec<Option<Vec<u8>>>) -> Self {
            MockLink {
                incoming: incoming.into(),
                sent: Arc::new(Mutex::new(Vec::new())),
                parts: Arc::new(Mutex::new(0)),
            }
        }

        pub fn sent(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
            Arc::clone(&self.sent)
        }

        pub fn parts(&self) -> Arc<Mutex<usize>> {
            Arc::clone(&self.parts)
        }
    }

    impl TransportLink for MockLink {
        fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        fn recv_frame(&mut self, _timeout: Duration) -> io::Result<Option<Vec<u8>>> {
            match self.incoming.pop_front() {
                Some(frame) => Ok(frame),
                None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Mock out of frames")),
            }
        }

        fn next_part(&mut self) -> io::Result<()> {
            *self.parts.lock().unwrap() += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(assembler: &mut SysexAssembler, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| assembler.push(b)).collect()
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap_sysex(&[0x7D, 0x7F, 0x11]), vec![0xF0, 0x7D, 0x7F, 0x11, 0xF7]);
    }

    #[test]
    fn test_assembler_extracts_messages() {
        let mut assembler = SysexAssembler::new(64);
        let stream = [0x01, 0xF0, 0x7D, 0x10, 0xF7, 0x90, 0x40, 0x7F, 0xF0, 0x01, 0xF7];
        assert_eq!(feed(&mut assembler, &stream), vec![vec![0x7D, 0x10], vec![0x01]]);
    }

    #[test]
    fn test_assembler_skips_realtime() {
        let mut assembler = SysexAssembler::new(64);
        let stream = [0xF0, 0x7D, 0xF8, 0x10, 0xFE, 0xF7];
        assert_eq!(feed(&mut assembler, &stream), vec![vec![0x7D, 0x10]]);
    }

    #[test]
    fn test_assembler_aborts_on_status() {
        let mut assembler = SysexAssembler::new(64);
        let stream = [0xF0, 0x7D, 0x10, 0x90, 0x40, 0x7F, 0xF7, 0xF0, 0x02, 0xF7];
        assert_eq!(feed(&mut assembler, &stream), vec![vec![0x02]]);
    }

    #[test]
    fn test_assembler_drops_oversized() {
        let mut assembler = SysexAssembler::new(4);
        let stream = [0xF0, 1, 2, 3, 4, 5, 0xF7, 0xF0, 1, 2, 3, 4, 0xF7];
        assert_eq!(feed(&mut assembler, &stream), vec![vec![1, 2, 3, 4]]);
    }

    #[test]
    fn test_fan_out() {
        let first = MockLink::new(vec![]);
        let second = MockLink::new(vec![]);
        let (sent1, sent2) = (first.sent(), second.sent());
        let (parts1, parts2) = (first.parts(), second.parts());

        let mut link = FanOut::new(vec![Box::new(first), Box::new(second)]);
        link.send_frame(&[1, 2, 3]).unwrap();
        link.next_part().unwrap();

        assert_eq!(*sent1.lock().unwrap(), vec![vec![1, 2, 3]]);
        assert_eq!(*sent2.lock().unwrap(), vec![vec![1, 2, 3]]);
        assert_eq!(*parts1.lock().unwrap(), 1);
        assert_eq!(*parts2.lock().unwrap(), 1);
        assert!(link.recv_frame(Duration::from_millis(1)).is_err());
    }
}
