/// Chunked transfer engine for characteristic writes
///
/// A payload larger than the transport's single-write limit is split into
/// limit-sized chunks (the last one possibly shorter). Acknowledged writes
/// consume one chunk per hardware acknowledgment; unacknowledged writes send
/// every chunk at once. Chunks carry no framing of their own.

use crate::error::GattError;
use crate::types::{AttributeId, WriteType};
use std::collections::VecDeque;

/// Default ATT_MTU-derived write limit when the hardware reports nothing
/// usable (23-byte minimum MTU minus the 3-byte ATT header)
pub const MIN_WRITE_LENGTH: usize = 20;

/// Split `data` into chunks of at most `limit` bytes.
///
/// A zero `limit` is clamped to one byte.
pub fn split_into_chunks(data: &[u8], limit: usize) -> Vec<Vec<u8>> {
    data.chunks(limit.max(1)).map(|c| c.to_vec()).collect()
}

/// Number of chunks `len` bytes split into at `limit`
pub fn chunk_count(len: usize, limit: usize) -> usize {
    len.div_ceil(limit.max(1))
}

/// A write awaiting per-chunk acknowledgment
#[derive(Debug, Clone)]
pub struct ChunkedWriteJob {
    characteristic: AttributeId,
    mode: WriteType,
    chunks: VecDeque<Vec<u8>>,
    total: usize,
}

impl ChunkedWriteJob {
    /// Create a job for `data`.
    ///
    /// Empty data is rejected here, before any hardware call is made.
    pub fn new(
        characteristic: AttributeId,
        data: &[u8],
        mode: WriteType,
        limit: usize,
    ) -> Result<Self, GattError> {
        if data.is_empty() {
            return Err(GattError::WriteDataMissing);
        }
        let chunks: VecDeque<Vec<u8>> = split_into_chunks(data, limit).into();
        let total = chunks.len();
        Ok(Self {
            characteristic,
            mode,
            chunks,
            total,
        })
    }

    pub fn characteristic(&self) -> AttributeId {
        self.characteristic
    }

    pub fn mode(&self) -> WriteType {
        self.mode
    }

    pub fn has_remaining(&self) -> bool {
        !self.chunks.is_empty()
    }

    /// Take the next chunk; the cursor only moves forward
    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.chunks.pop_front()
    }

    /// Chunks not yet handed out
    pub fn remaining(&self) -> usize {
        self.chunks.len()
    }

    pub fn total_chunks(&self) -> usize {
        self.total
    }

    pub fn sent_chunks(&self) -> usize {
        self.total - self.chunks.len()
    }

    /// Consume the job, yielding every chunk left in order
    pub fn into_chunks(self) -> impl Iterator<Item = Vec<u8>> {
        self.chunks.into_iter()
    }
}
