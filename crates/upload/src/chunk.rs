//! Per-chunk transfer state machine.
//!
//! ```text
//! Pending ──► Testing ──► Uploading ──► Success | Error
//!    ▲           │            │  ▲
//!    └── abort ──┴── abort ───┘  └── transient failure (retry)
//! ```
//!
//! A chunk only mutates itself; the owning file and the engine act on the
//! resolution values it returns.

use std::ops::Range;
use std::time::Duration;

use resumable_transfer::ProgressThrottle;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::ParameterNames;
use crate::events::FileInfo;
use crate::transport::{SendOutcome, TestOutcome};

/// Lifecycle state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    /// Existence test in flight.
    Testing,
    /// Transfer in flight, or waiting to be resent.
    Uploading,
    Success,
    Error,
}

impl ChunkStatus {
    /// Occupies an upload slot.
    pub fn is_in_flight(self) -> bool {
        matches!(self, ChunkStatus::Testing | ChunkStatus::Uploading)
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, ChunkStatus::Success | ChunkStatus::Error)
    }
}

/// Address of one transfer attempt.
///
/// `file` is the engine-internal file key, `generation` the file's bootstrap
/// count and `attempt` the chunk's dispatch count. A completion whose key no
/// longer matches is stale and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkKey {
    pub(crate) file: u64,
    pub(crate) generation: u64,
    pub(crate) offset: usize,
    pub(crate) attempt: u64,
}

/// What [`Chunk::begin`] decided to do.
#[derive(Debug)]
pub(crate) enum Begin {
    Test(CancellationToken),
    Send(CancellationToken),
}

#[derive(Debug, PartialEq)]
pub(crate) enum SendResolution {
    Succeeded(Option<Value>),
    Failed(Option<Value>),
    /// Resend; `attempt` is the retry number starting at 1.
    Retry { attempt: u32 },
    Aborted,
}

#[derive(Debug, PartialEq)]
pub(crate) enum TestResolution {
    Exists(Option<Value>),
    Missing,
    Aborted,
}

#[derive(Debug)]
pub(crate) struct Chunk {
    offset: usize,
    range: Range<u64>,
    status: ChunkStatus,
    loaded: u64,
    retries: u32,
    tested: bool,
    pending_retry: bool,
    attempt: u64,
    throttle: ProgressThrottle,
    cancel: Option<CancellationToken>,
}

impl Chunk {
    pub(crate) fn new(offset: usize, range: Range<u64>, throttle: Duration) -> Self {
        Self {
            offset,
            range,
            status: ChunkStatus::Pending,
            loaded: 0,
            retries: 0,
            tested: false,
            pending_retry: false,
            attempt: 0,
            throttle: ProgressThrottle::new(throttle),
            cancel: None,
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn range(&self) -> Range<u64> {
        self.range.clone()
    }

    pub(crate) fn width(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub(crate) fn status(&self) -> ChunkStatus {
        self.status
    }

    pub(crate) fn attempt(&self) -> u64 {
        self.attempt
    }

    #[cfg(test)]
    pub(crate) fn retries(&self) -> u32 {
        self.retries
    }

    pub(crate) fn is_pending_retry(&self) -> bool {
        self.pending_retry
    }

    fn arm(&mut self) -> CancellationToken {
        self.attempt += 1;
        let token = CancellationToken::new();
        self.cancel = Some(token.clone());
        token
    }

    /// Starts a transfer attempt: an existence test first if enabled and not
    /// yet done, otherwise the upload itself.
    pub(crate) fn begin(&mut self, test_chunks: bool) -> Begin {
        let token = self.arm();

        if test_chunks && !self.tested {
            self.status = ChunkStatus::Testing;
            return Begin::Test(token);
        }

        self.status = ChunkStatus::Uploading;
        self.loaded = 0;
        self.pending_retry = false;
        Begin::Send(token)
    }

    /// Applies the transport's send outcome.
    pub(crate) fn resolve_send(&mut self, outcome: SendOutcome, max_retries: u32) -> SendResolution {
        self.cancel = None;

        match outcome {
            SendOutcome::Success(response) => {
                self.status = ChunkStatus::Success;
                SendResolution::Succeeded(response)
            }
            SendOutcome::Failed {
                permanent,
                response,
            } if permanent || self.retries >= max_retries => {
                self.status = ChunkStatus::Error;
                SendResolution::Failed(response)
            }
            SendOutcome::Failed { .. } => {
                self.retries += 1;
                SendResolution::Retry {
                    attempt: self.retries,
                }
            }
            SendOutcome::Aborted => {
                self.release();
                SendResolution::Aborted
            }
        }
    }

    /// Parks the chunk until a delayed resend. Progress reads 0 meanwhile.
    /// The returned token cancels the wait.
    pub(crate) fn schedule_retry(&mut self) -> CancellationToken {
        self.pending_retry = true;
        self.arm()
    }

    /// Applies the transport's existence-test outcome.
    pub(crate) fn resolve_test(&mut self, outcome: TestOutcome) -> TestResolution {
        self.cancel = None;

        match outcome {
            TestOutcome::Exists(response) => {
                self.tested = true;
                self.status = ChunkStatus::Success;
                TestResolution::Exists(response)
            }
            TestOutcome::Missing => {
                self.tested = true;
                TestResolution::Missing
            }
            TestOutcome::Aborted => {
                self.release();
                TestResolution::Aborted
            }
        }
    }

    /// Puts the chunk back to pending without starting anything.
    pub(crate) fn release(&mut self) {
        self.status = ChunkStatus::Pending;
        self.pending_retry = false;
        self.cancel = None;
    }

    /// Signals cancellation of the in-flight attempt, if any.
    pub(crate) fn abort(&self) {
        if let Some(token) = &self.cancel {
            token.cancel();
        }
    }

    /// Records transport progress; returns `true` if it should be forwarded.
    pub(crate) fn record_progress(&mut self, loaded: u64) -> bool {
        self.loaded = loaded.min(self.width());
        self.throttle.ready()
    }

    /// Completed fraction of this chunk, or of the whole file when
    /// `relative_to` carries the file size.
    pub(crate) fn progress(&self, relative_to: Option<u64>) -> f64 {
        if self.status == ChunkStatus::Pending || self.pending_retry {
            return 0.0;
        }

        let width = self.width();
        let factor = match relative_to {
            Some(file_size) if file_size > 0 => width as f64 / file_size as f64,
            _ => 1.0,
        };

        match self.status {
            ChunkStatus::Success | ChunkStatus::Error => factor,
            _ if width == 0 => 0.0,
            _ => self.loaded as f64 / width as f64 * factor,
        }
    }
}

/// Request parameters for one chunk, in a fixed order.
///
/// Zero numbers and empty strings are left out.
pub(crate) fn request_params(
    names: &ParameterNames,
    nominal_chunk_size: u64,
    chunk: &Chunk,
    file: &FileInfo,
    total_chunks: usize,
) -> Vec<(String, String)> {
    let mut params = Vec::with_capacity(9);
    let mut number = |field: &str, value: u64| {
        if value != 0 {
            params.push((names.name(field), value.to_string()));
        }
    };
    number(&names.chunk_number, chunk.offset() as u64 + 1);
    number(&names.chunk_size, nominal_chunk_size);
    number(&names.current_chunk_size, chunk.width());
    number(&names.total_size, file.size);

    let mut text = |field: &str, value: &str| {
        if !value.is_empty() {
            params.push((names.name(field), value.to_string()));
        }
    };
    text(&names.file_type, &file.mime_type);
    text(&names.identifier, &file.unique_id);
    text(&names.file_name, &file.name);
    text(&names.relative_path, &file.relative_path);

    if total_chunks != 0 {
        params.push((names.name(&names.total_chunks), total_chunks.to_string()));
    }
    params
}
