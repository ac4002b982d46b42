//! Transport capability and the chunk descriptor handed to it.
//!
//! The engine never talks to the network. For every chunk it calls the
//! host's [`ChunkTransport`] with a read-only [`ChunkRequest`] and treats the
//! returned outcome as the completion of that chunk.

use std::fmt;
use std::future::Future;
use std::ops::Range;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use resumable_transfer::{Blob, TransferError};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::chunk::ChunkKey;
use crate::engine::{Engine, Shared};
use crate::events::FileInfo;

/// Boxed future returned by transports and id generators.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of sending one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// The server stored the chunk.
    Success(Option<Value>),
    /// The transfer failed. `permanent` failures are never retried.
    Failed {
        permanent: bool,
        response: Option<Value>,
    },
    /// The request observed the cancellation token and stopped.
    Aborted,
}

impl SendOutcome {
    pub fn transient(response: Option<Value>) -> Self {
        SendOutcome::Failed {
            permanent: false,
            response,
        }
    }

    pub fn permanent(response: Option<Value>) -> Self {
        SendOutcome::Failed {
            permanent: true,
            response,
        }
    }
}

/// Result of asking the server whether a chunk already exists.
#[derive(Debug, Clone, PartialEq)]
pub enum TestOutcome {
    /// Already stored; the chunk is not sent.
    Exists(Option<Value>),
    /// Not stored; the chunk is sent next.
    Missing,
    Aborted,
}

/// Host-supplied transport for chunk transfers.
///
/// Implementations must resolve with `Aborted` once the request's
/// cancellation token fires; a transport that keeps going and reports
/// success or failure instead leaves the chunk state to whatever it reports.
/// An aborted chunk goes back to pending and, unless the engine is paused,
/// is dispatched again.
///
/// Using a trait keeps the engine decoupled from any HTTP client and
/// testable with mocks.
pub trait ChunkTransport: Send + Sync {
    /// Uploads the chunk described by `request`.
    fn send_chunk(&self, request: ChunkRequest) -> BoxFuture<'_, SendOutcome>;

    /// Asks the server whether the chunk described by `request` exists.
    ///
    /// Only called when [`supports_existence_test`](Self::supports_existence_test)
    /// returns `true`.
    fn test_chunk(&self, _request: ChunkRequest) -> BoxFuture<'_, TestOutcome> {
        Box::pin(async { TestOutcome::Missing })
    }

    /// Whether [`test_chunk`](Self::test_chunk) is implemented.
    fn supports_existence_test(&self) -> bool {
        false
    }
}

/// Bytes of one chunk, ready to be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPayload {
    pub data: Vec<u8>,
    /// MIME type, when `set_chunk_type_from_file` is on and the type is known.
    pub content_type: Option<String>,
}

/// Read-only description of one chunk transfer.
#[derive(Clone)]
pub struct ChunkRequest {
    pub(crate) file: Arc<FileInfo>,
    pub(crate) offset: usize,
    pub(crate) range: Range<u64>,
    pub(crate) params: Vec<(String, String)>,
    pub(crate) content_type: Option<String>,
    pub(crate) blob: Blob,
    pub(crate) cancel: CancellationToken,
    pub(crate) progress: ProgressHandle,
}

impl ChunkRequest {
    pub fn file(&self) -> &FileInfo {
        &self.file
    }

    /// Zero-based chunk offset within the file.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// One-based chunk number, as sent to servers.
    pub fn number(&self) -> usize {
        self.offset + 1
    }

    /// Byte range `[start, end)` within the file.
    pub fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    /// Width of this chunk in bytes.
    pub fn width(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// Request parameters in a stable order. Empty and zero values are left out.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Looks up a parameter by its full name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Reads the chunk's bytes from the underlying file.
    pub async fn payload(&self) -> Result<ChunkPayload, TransferError> {
        let data = self.blob.read_range_async(self.range.clone()).await?;
        Ok(ChunkPayload {
            data,
            content_type: self.content_type.clone(),
        })
    }

    /// Token fired when the engine wants this transfer stopped.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Reports `loaded` bytes of this chunk sent so far.
    ///
    /// Cheap to call often; forwarding to subscribers is throttled.
    pub fn report_progress(&self, loaded: u64) {
        self.progress.report(loaded);
    }
}

impl fmt::Debug for ChunkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkRequest")
            .field("file", &self.file.unique_id)
            .field("offset", &self.offset)
            .field("range", &self.range)
            .field("params", &self.params)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Route from a transport back to the chunk it is transferring.
#[derive(Clone)]
pub(crate) struct ProgressHandle {
    engine: Weak<Shared>,
    key: ChunkKey,
}

impl ProgressHandle {
    pub(crate) fn new(engine: Weak<Shared>, key: ChunkKey) -> Self {
        Self { engine, key }
    }

    fn report(&self, loaded: u64) {
        if let Some(shared) = self.engine.upgrade() {
            Engine::from_shared(shared).chunk_progress(self.key, loaded);
        }
    }
}
