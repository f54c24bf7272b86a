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

//! `.syx` files as frame sinks and sources

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use crate::link::{wrap_sysex, SysexAssembler, TransportLink};

// ============================================================================
// Sink
// ============================================================================

/// Writes each frame as a delimited SysEx message. Every transfer part after
/// the first goes to a fresh sibling file.
pub struct SysexFileSink {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SysexFileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let out = BufWriter::new(File::create(path)?);
        Ok(SysexFileSink { path: path.to_path_buf(), out })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TransportLink for SysexFileSink {
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.out.write_all(&wrap_sysex(frame))?;
        self.out.flush()
    }

    fn recv_frame(&mut self, _timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "SysEx file sink is write only"))
    }

    fn next_part(&mut self) -> io::Result<()> {
        self.out.flush()?;
        let path = nonexistent_sibling(&self.path);
        self.out = BufWriter::new(File::create(&path)?);
        info!("Writing SysEx file {}", path.display());
        self.path = path;
        Ok(())
    }
}

/// `name.syx` -> first free of `name(2).syx`, `name(3).syx`, ...
pub fn nonexistent_sibling(path: &Path) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let stem = strip_counter(&stem).to_string();
    let ext = path.extension().map(|e| format!(".{}", e.to_string_lossy()));

    let mut n = 2;
    loop {
        let name = format!("{}({}){}", stem, n, ext.as_deref().unwrap_or(""));
        let candidate = path.with_file_name(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn strip_counter(stem: &str) -> &str {
    if let Some(open) = stem.rfind('(') {
        let inner = &stem[open + 1..];
        if let Some(digits) = inner.strip_suffix(')') {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return &stem[..open];
            }
        }
    }
    stem
}

// ============================================================================
// Source
// ============================================================================

/// Replays the SysEx messages stored in a file.
pub struct SysexFileSource {
    frames: VecDeque<Vec<u8>>,
}

impl SysexFileSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let data = std::fs::read(path)?;
        let mut assembler = SysexAssembler::new(data.len());
        let frames = data.iter().filter_map(|&b| assembler.push(b)).collect();
        Ok(SysexFileSource { frames })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl TransportLink for SysexFileSource {
    fn send_frame(&mut self, _frame: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "SysEx file source is read only"))
    }

    fn recv_frame(&mut self, _timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of SysEx file")),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
