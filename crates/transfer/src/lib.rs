//! Byte-level plumbing for chunked, resumable uploads.
//!
//! Everything here is independent of scheduling: where the bytes come from
//! ([`FileSource`], [`Blob`]), how a file is cut into chunks
//! ([`ChunkLayout`]), checksums, relative-path validation and the small
//! progress helpers the upload engine builds on.

mod chunked;
mod progress;
mod types;
mod validation;

pub use chunked::{ChunkLayout, calculate_file_checksum, checksum_bytes};
pub use progress::{ProgressFloor, ProgressThrottle};
pub use types::{Blob, FileSource, detect_mime_type};
pub use validation::validate_upload_path;

/// Default nominal chunk width: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("byte range {start}..{end} outside of {size}-byte source")]
    RangeOutOfBounds { start: u64, end: u64, size: u64 },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("background read failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
