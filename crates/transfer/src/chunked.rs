use std::io::Read;
use std::ops::Range;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
pub fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// ChunkLayout
// ---------------------------------------------------------------------------

/// How a file of a given size is cut into byte ranges.
///
/// With `force_chunk_size` every chunk is at most `chunk_size` wide and the
/// last one holds the remainder. Without it the chunk count is rounded down
/// and the last chunk absorbs the remainder, so its width lies in
/// `[chunk_size, 2 * chunk_size)` unless it is the only chunk.
///
/// A zero-byte file still has exactly one (empty) chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    file_size: u64,
    chunk_size: u64,
    force_chunk_size: bool,
}

impl ChunkLayout {
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] (1 MiB) is used.
    pub fn new(file_size: u64, chunk_size: u64, force_chunk_size: bool) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            file_size,
            chunk_size,
            force_chunk_size,
        }
    }

    /// Nominal chunk width.
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of chunks, never less than 1.
    pub fn count(&self) -> usize {
        let whole = self.file_size / self.chunk_size;
        let count = if self.force_chunk_size && self.file_size % self.chunk_size != 0 {
            whole + 1
        } else {
            whole
        };
        count.max(1) as usize
    }

    /// Byte range of the chunk at zero-based `offset`.
    ///
    /// Offsets past [`count`](Self::count) yield an empty range at the end
    /// of the file.
    pub fn range(&self, offset: usize) -> Range<u64> {
        let offset = offset as u64;
        let start = (offset * self.chunk_size).min(self.file_size);
        let mut end = ((offset + 1) * self.chunk_size).min(self.file_size);

        if !self.force_chunk_size && self.file_size - end < self.chunk_size {
            end = self.file_size;
        }

        start..end
    }

    /// All chunk ranges in offset order.
    pub fn ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        (0..self.count()).map(|offset| self.range(offset))
    }
}
