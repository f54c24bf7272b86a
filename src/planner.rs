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

//! Chunk and part boundaries for an outgoing image

use std::ops::Range;

/// Largest binary chunk whose encoding fits in `max_payload` SysEx bytes.
pub fn binary_chunk_len(max_payload: usize) -> usize {
    max_payload * 7 / 8
}

/// Ordered `(sequence, byte range)` pairs for one transfer part. Sequence 0
/// is the header frame, so data starts at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    chunks: Vec<(u32, Range<usize>)>,
}

impl ChunkPlan {
    pub fn new(total: usize, chunk_len: usize) -> Self {
        let chunk_len = chunk_len.max(1);
        let chunks = (0..total)
            .step_by(chunk_len)
            .zip(1u32..)
            .map(|(start, seq)| (seq, start..(start + chunk_len).min(total)))
            .collect();
        ChunkPlan { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&(u32, Range<usize>)> {
        self.chunks.get(idx)
    }

    /// Sequence number of the checksum frame that follows the data.
    pub fn checksum_sequence(&self) -> u32 {
        self.chunks.len() as u32 + 1
    }
}

/// Splits `total` bytes into parts of `part_size`, the remainder going last.
/// Without a part size, or when the image fits, there is a single part.
pub fn plan_parts(total: usize, part_size: Option<usize>) -> Vec<Range<usize>> {
    let mut parts = Vec::new();
    let mut start = 0;
    if let Some(size) = part_size.filter(|&s| s > 0) {
        while total - start > size {
            parts.push(start..start + size);
            start += size;
        }
    }
    parts.push(start..total);
    parts
}
