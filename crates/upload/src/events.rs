//! Engine notifications.
//!
//! Every subscriber gets its own receiver from
//! [`Engine::subscribe`](crate::Engine::subscribe); events are broadcast in
//! the order the engine emits them.

use std::sync::Arc;

use resumable_transfer::FileSource;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Identity of an admitted (or skipped) file, shared by all events about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub unique_id: String,
    pub name: String,
    /// Relative path, or the bare name for loose files.
    pub relative_path: String,
    pub size: u64,
    pub mime_type: String,
}

impl FileInfo {
    pub(crate) fn new(unique_id: String, source: &FileSource) -> Self {
        Self {
            unique_id,
            name: source.name.clone(),
            relative_path: source.path().to_string(),
            size: source.size(),
            mime_type: source.mime_type.clone(),
        }
    }
}

/// Notification emitted by the engine.
///
/// `response` fields carry whatever the transport returned from the server.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A drop is about to be expanded and admitted.
    BeforeAdd,
    FileAdded {
        file: Arc<FileInfo>,
    },
    /// One admission batch finished with at least one file admitted or skipped.
    FilesAdded {
        added: Vec<Arc<FileInfo>>,
        skipped: Vec<Arc<FileInfo>>,
    },
    ChunkingStart {
        file: Arc<FileInfo>,
    },
    ChunkingProgress {
        file: Arc<FileInfo>,
        fraction: f64,
    },
    ChunkingComplete {
        file: Arc<FileInfo>,
    },
    UploadStart,
    FileProgress {
        file: Arc<FileInfo>,
        progress: f64,
        response: Option<Value>,
    },
    /// A chunk failed transiently and will be resent.
    FileRetry {
        file: Arc<FileInfo>,
        offset: usize,
        attempt: u32,
    },
    FileSuccess {
        file: Arc<FileInfo>,
        response: Option<Value>,
    },
    FileError {
        file: Arc<FileInfo>,
        response: Option<Value>,
    },
    /// Size-weighted progress over all files.
    Progress {
        progress: f64,
    },
    Pause,
    BeforeCancel,
    Cancel,
    Complete,
    /// Any per-file failure, including the ones reported as `FileError`.
    Error {
        path: String,
        message: String,
    },
}

impl UploadEvent {
    /// Stable event name, matching the subscription names hosts know.
    pub fn name(&self) -> &'static str {
        match self {
            UploadEvent::BeforeAdd => "beforeAdd",
            UploadEvent::FileAdded { .. } => "fileAdded",
            UploadEvent::FilesAdded { .. } => "filesAdded",
            UploadEvent::ChunkingStart { .. } => "chunkingStart",
            UploadEvent::ChunkingProgress { .. } => "chunkingProgress",
            UploadEvent::ChunkingComplete { .. } => "chunkingComplete",
            UploadEvent::UploadStart => "uploadStart",
            UploadEvent::FileProgress { .. } => "fileProgress",
            UploadEvent::FileRetry { .. } => "fileRetry",
            UploadEvent::FileSuccess { .. } => "fileSuccess",
            UploadEvent::FileError { .. } => "fileError",
            UploadEvent::Progress { .. } => "progress",
            UploadEvent::Pause => "pause",
            UploadEvent::BeforeCancel => "beforeCancel",
            UploadEvent::Cancel => "cancel",
            UploadEvent::Complete => "complete",
            UploadEvent::Error { .. } => "error",
        }
    }
}

/// Fan-out of [`UploadEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<UploadEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: UploadEvent) {
        trace!(event = event.name(), "emitting upload event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
