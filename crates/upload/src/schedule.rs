//! Choice of the next chunk to transfer.

use crate::chunk::{Chunk, ChunkStatus};
use crate::file::UploadFile;

/// Position of a chunk inside the engine's file list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkSlot {
    pub(crate) file: usize,
    pub(crate) chunk: usize,
}

fn is_pending(chunk: Option<&Chunk>) -> bool {
    chunk.is_some_and(|c| c.status() == ChunkStatus::Pending)
}

/// Picks the next pending chunk, or `None` when nothing is waiting.
///
/// With `prioritize` the first chunk of every file goes first, then the last
/// one; servers can inspect headers and trailers before the bulk arrives.
/// That pass does not look at the pause flag. The regular pass walks files in
/// insertion order, skips paused ones, and takes the lowest pending offset.
pub(crate) fn next_chunk(files: &[UploadFile], prioritize: bool) -> Option<ChunkSlot> {
    if prioritize {
        for (index, file) in files.iter().enumerate() {
            let chunks = file.chunks();
            if is_pending(chunks.first()) {
                return Some(ChunkSlot {
                    file: index,
                    chunk: 0,
                });
            }
            if chunks.len() > 1 && is_pending(chunks.last()) {
                return Some(ChunkSlot {
                    file: index,
                    chunk: chunks.len() - 1,
                });
            }
        }
    }

    files
        .iter()
        .enumerate()
        .filter(|(_, file)| !file.is_paused())
        .find_map(|(index, file)| {
            file.chunks()
                .iter()
                .position(|c| c.status() == ChunkStatus::Pending)
                .map(|chunk| ChunkSlot { file: index, chunk })
        })
}
