//! A file owned by the engine and the chunks it was cut into.

use std::sync::Arc;

use resumable_transfer::{FileSource, ProgressFloor};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::chunk::{Chunk, ChunkKey, ChunkStatus};
use crate::config::UploadConfig;
use crate::events::{EventBus, FileInfo, UploadEvent};

pub(crate) struct UploadFile {
    key: u64,
    info: Arc<FileInfo>,
    source: FileSource,
    chunks: Vec<Chunk>,
    paused: bool,
    error: bool,
    floor: ProgressFloor,
    generation: u64,
}

impl UploadFile {
    pub(crate) fn new(key: u64, info: Arc<FileInfo>, source: FileSource) -> Self {
        Self {
            key,
            info,
            source,
            chunks: Vec::new(),
            paused: false,
            error: false,
            floor: ProgressFloor::new(),
            generation: 0,
        }
    }

    pub(crate) fn info(&self) -> &Arc<FileInfo> {
        &self.info
    }

    pub(crate) fn unique_id(&self) -> &str {
        &self.info.unique_id
    }

    pub(crate) fn source(&self) -> &FileSource {
        &self.source
    }

    pub(crate) fn size(&self) -> u64 {
        self.info.size
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn chunk_mut(&mut self, offset: usize) -> Option<&mut Chunk> {
        self.chunks.get_mut(offset)
    }

    /// Key of the chunk's current attempt.
    pub(crate) fn chunk_key(&self, offset: usize) -> Option<ChunkKey> {
        self.chunks.get(offset).map(|chunk| ChunkKey {
            file: self.key,
            generation: self.generation,
            offset,
            attempt: chunk.attempt(),
        })
    }

    /// Whether `key` still addresses the live attempt of one of our chunks.
    pub(crate) fn is_current(&self, key: &ChunkKey) -> bool {
        key.file == self.key
            && key.generation == self.generation
            && self
                .chunks
                .get(key.offset)
                .is_some_and(|chunk| chunk.attempt() == key.attempt)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    #[cfg(test)]
    pub(crate) fn is_error(&self) -> bool {
        self.error
    }

    /// Cuts the file into fresh chunks and starts a new generation.
    ///
    /// Runs synchronously: every `ChunkingProgress` and the final
    /// `ChunkingComplete` are emitted before this returns.
    pub(crate) fn bootstrap(&mut self, config: &UploadConfig, events: &EventBus) {
        self.error = false;
        self.floor.reset();
        self.generation += 1;

        let layout = config.layout(self.size());
        let count = layout.count();
        let throttle = config.throttle_interval();

        self.chunks = layout
            .ranges()
            .enumerate()
            .map(|(offset, range)| {
                events.emit(UploadEvent::ChunkingProgress {
                    file: Arc::clone(&self.info),
                    fraction: offset as f64 / count as f64,
                });
                Chunk::new(offset, range, throttle)
            })
            .collect();

        debug!(
            file = %self.info.unique_id,
            chunks = count,
            generation = self.generation,
            "file chunked"
        );
        events.emit(UploadEvent::ChunkingComplete {
            file: Arc::clone(&self.info),
        });
    }

    /// No chunk is waiting or in flight.
    pub(crate) fn is_complete(&self) -> bool {
        !self
            .chunks
            .iter()
            .any(|chunk| !chunk.status().is_resolved())
    }

    /// At least one chunk is in flight.
    pub(crate) fn is_uploading(&self) -> bool {
        self.in_flight() > 0
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.chunks
            .iter()
            .filter(|chunk| chunk.status().is_in_flight())
            .count()
    }

    /// Completed fraction, never lower than any value reported before within
    /// this generation.
    pub(crate) fn progress(&mut self) -> f64 {
        if self.error {
            return 1.0;
        }

        let size = self.size();
        let mut total = 0.0;
        for chunk in &self.chunks {
            if chunk.status() == ChunkStatus::Error {
                total = 1.0;
                break;
            }
            total += chunk.progress(Some(size));
        }

        self.floor.apply(total)
    }

    fn emit_progress(&mut self, response: Option<Value>, events: &EventBus) {
        let progress = self.progress();
        events.emit(UploadEvent::FileProgress {
            file: Arc::clone(&self.info),
            progress,
            response,
        });
    }

    /// A chunk finished. Returns `true` if that completed the file.
    pub(crate) fn handle_chunk_success(&mut self, response: Option<Value>, events: &EventBus) -> bool {
        if self.error {
            return false;
        }

        self.emit_progress(response.clone(), events);

        if self.is_complete() {
            events.emit(UploadEvent::FileSuccess {
                file: Arc::clone(&self.info),
                response,
            });
            return true;
        }
        false
    }

    /// A chunk failed for good: the whole file is marked as errored.
    /// Returns how many sibling chunks were still in flight.
    pub(crate) fn handle_chunk_error(&mut self, response: Option<Value>, events: &EventBus) -> usize {
        let aborted = self.abort(events);
        self.error = true;
        self.chunks.clear();

        let message = match &response {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => "chunk upload failed".to_string(),
        };
        warn!(file = %self.info.unique_id, error = %message, "file upload failed");

        events.emit(UploadEvent::FileError {
            file: Arc::clone(&self.info),
            response,
        });
        events.emit(UploadEvent::Error {
            path: self.info.relative_path.clone(),
            message,
        });
        aborted
    }

    pub(crate) fn handle_chunk_progress(&mut self, events: &EventBus) {
        self.emit_progress(None, events);
    }

    pub(crate) fn handle_chunk_retry(&self, offset: usize, attempt: u32, events: &EventBus) {
        events.emit(UploadEvent::FileRetry {
            file: Arc::clone(&self.info),
            offset,
            attempt,
        });
    }

    /// Signals every in-flight chunk to stop. Returns how many were signalled.
    pub(crate) fn abort(&mut self, events: &EventBus) -> usize {
        let mut aborted = 0;
        for chunk in self.chunks.iter().filter(|c| c.status().is_in_flight()) {
            chunk.abort();
            aborted += 1;
        }

        if aborted > 0 {
            self.emit_progress(None, events);
        }
        aborted
    }

    /// Drops every chunk, signalling the in-flight ones. Returns how many
    /// were in flight.
    pub(crate) fn detach(&mut self) -> usize {
        let chunks = std::mem::take(&mut self.chunks);
        let mut aborted = 0;
        for chunk in chunks.iter().filter(|c| c.status().is_in_flight()) {
            chunk.abort();
            aborted += 1;
        }
        aborted
    }

    /// Detaches every chunk and reports the final progress. The caller
    /// removes the file and refills one slot per returned in-flight chunk.
    pub(crate) fn cancel(&mut self, events: &EventBus) -> usize {
        let aborted = self.detach();
        self.emit_progress(None, events);
        aborted
    }

    pub(crate) fn snapshot(&mut self) -> FileSnapshot {
        FileSnapshot {
            info: (*self.info).clone(),
            progress: self.progress(),
            paused: self.paused,
            error: self.error,
            complete: self.is_complete(),
            uploading: self.is_uploading(),
            chunks: self.chunks.iter().map(Chunk::status).collect(),
        }
    }
}

/// Point-in-time view of one file, as returned by
/// [`Engine::files`](crate::Engine::files).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSnapshot {
    #[serde(flatten)]
    pub info: FileInfo,
    pub progress: f64,
    pub paused: bool,
    pub error: bool,
    pub complete: bool,
    pub uploading: bool,
    /// Chunk states by offset.
    pub chunks: Vec<ChunkStatus>,
}

impl FileSnapshot {
    pub fn unique_id(&self) -> &str {
        &self.info.unique_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Begin;
    use crate::transport::SendOutcome;
    use serde_json::json;
    use tokio::sync::broadcast;

    fn config(chunk_size: u64, force: bool) -> UploadConfig {
        UploadConfig {
            chunk_size,
            force_chunk_size: force,
            throttle_progress_callbacks_ms: 0,
            ..UploadConfig::default()
        }
    }

    fn file(size: usize) -> UploadFile {
        let source = FileSource::from_bytes("data.bin", vec![7u8; size]);
        let info = Arc::new(FileInfo::new("data-id".into(), &source));
        UploadFile::new(1, info, source)
    }

    fn drain(rx: &mut broadcast::Receiver<UploadEvent>) -> Vec<UploadEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn names(events: &[UploadEvent]) -> Vec<&'static str> {
        events.iter().map(UploadEvent::name).collect()
    }

    /// Sends chunk `offset` and resolves it with `outcome`.
    fn send(f: &mut UploadFile, offset: usize, outcome: SendOutcome) {
        let chunk = f.chunk_mut(offset).unwrap();
        assert!(matches!(chunk.begin(false), Begin::Send(_)));
        chunk.resolve_send(outcome, 0);
    }

    #[test]
    fn bootstrap_emits_chunking_events() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut f = file(40);

        f.bootstrap(&config(10, true), &bus);
        assert_eq!(f.chunks().len(), 4);
        assert_eq!(f.generation(), 1);

        let events = drain(&mut rx);
        assert_eq!(
            names(&events),
            vec![
                "chunkingProgress",
                "chunkingProgress",
                "chunkingProgress",
                "chunkingProgress",
                "chunkingComplete"
            ]
        );
        let fractions: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                UploadEvent::ChunkingProgress { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions, vec![0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn unforced_bootstrap_merges_remainder() {
        let bus = EventBus::new(64);
        let mut f = file(25);
        f.bootstrap(&config(10, false), &bus);
        let widths: Vec<u64> = f.chunks().iter().map(Chunk::width).collect();
        assert_eq!(widths, vec![10, 15]);
    }

    #[test]
    fn empty_file_has_one_chunk() {
        let bus = EventBus::new(64);
        let mut f = file(0);
        f.bootstrap(&config(10, true), &bus);
        assert_eq!(f.chunks().len(), 1);
        assert_eq!(f.chunks()[0].width(), 0);
        assert!(!f.is_complete());

        send(&mut f, 0, SendOutcome::Success(None));
        assert!(f.is_complete());
        assert_eq!(f.progress(), 1.0);
    }

    #[test]
    fn completion_and_progress() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut f = file(20);
        f.bootstrap(&config(10, true), &bus);
        drain(&mut rx);

        assert!(!f.is_complete());
        assert!(!f.is_uploading());
        assert_eq!(f.progress(), 0.0);

        send(&mut f, 0, SendOutcome::Success(Some(json!("first"))));
        assert!(!f.handle_chunk_success(Some(json!("first")), &bus));
        assert_eq!(f.progress(), 0.5);

        send(&mut f, 1, SendOutcome::Success(Some(json!("last"))));
        assert!(f.handle_chunk_success(Some(json!("last")), &bus));
        assert_eq!(f.progress(), 1.0);

        let events = drain(&mut rx);
        assert_eq!(
            names(&events),
            vec!["fileProgress", "fileProgress", "fileSuccess"]
        );
        assert!(matches!(
            &events[2],
            UploadEvent::FileSuccess { response: Some(r), .. } if r == "last"
        ));
    }

    #[test]
    fn progress_is_monotonic_across_aborts() {
        let bus = EventBus::new(64);
        let mut f = file(20);
        f.bootstrap(&config(10, true), &bus);

        let chunk = f.chunk_mut(0).unwrap();
        chunk.begin(false);
        chunk.record_progress(8);
        assert_eq!(f.progress(), 0.4);

        // Aborted chunk drops back to pending and reads 0.
        f.chunk_mut(0).unwrap().resolve_send(SendOutcome::Aborted, 2);
        assert_eq!(f.progress(), 0.4);
        assert_eq!(f.progress(), 0.4);
    }

    #[test]
    fn error_chunk_dominates_progress() {
        let bus = EventBus::new(64);
        let mut f = file(30);
        f.bootstrap(&config(10, true), &bus);
        send(&mut f, 1, SendOutcome::permanent(None));
        assert_eq!(f.progress(), 1.0);
    }

    #[test]
    fn chunk_error_marks_file() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut f = file(30);
        f.bootstrap(&config(10, true), &bus);
        f.chunk_mut(2).unwrap().begin(false);
        send(&mut f, 0, SendOutcome::permanent(Some(json!("boom"))));
        drain(&mut rx);

        // Chunk 2 was still in flight.
        assert_eq!(f.handle_chunk_error(Some(json!("boom")), &bus), 1);
        assert!(f.is_error());
        assert!(f.chunks().is_empty());
        assert!(f.is_complete());
        assert_eq!(f.progress(), 1.0);

        let events = drain(&mut rx);
        assert_eq!(names(&events), vec!["fileProgress", "fileError", "error"]);
        assert!(matches!(
            &events[2],
            UploadEvent::Error { path, message } if path == "data.bin" && message == "boom"
        ));

        // Late successes from the errored file are ignored.
        assert!(!f.handle_chunk_success(None, &bus));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn abort_counts_in_flight_chunks() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut f = file(30);
        f.bootstrap(&config(10, true), &bus);
        drain(&mut rx);

        assert_eq!(f.abort(&bus), 0);
        assert!(drain(&mut rx).is_empty());

        let Begin::Send(token) = f.chunk_mut(0).unwrap().begin(false) else {
            panic!("expected send");
        };
        assert!(matches!(f.chunk_mut(1).unwrap().begin(true), Begin::Test(_)));
        assert_eq!(f.in_flight(), 2);

        assert_eq!(f.abort(&bus), 2);
        assert!(token.is_cancelled());
        assert_eq!(names(&drain(&mut rx)), vec!["fileProgress"]);
    }

    #[test]
    fn cancel_detaches_chunks() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut f = file(30);
        f.bootstrap(&config(10, true), &bus);
        f.chunk_mut(1).unwrap().begin(false);
        drain(&mut rx);

        assert_eq!(f.cancel(&bus), 1);
        assert!(f.chunks().is_empty());
        assert_eq!(names(&drain(&mut rx)), vec!["fileProgress"]);
    }

    #[test]
    fn rebootstrap_starts_new_generation() {
        let bus = EventBus::new(64);
        let mut f = file(20);
        f.bootstrap(&config(10, true), &bus);
        f.chunk_mut(0).unwrap().begin(false);
        let stale = f.chunk_key(0).unwrap();
        assert!(f.is_current(&stale));

        send(&mut f, 1, SendOutcome::permanent(None));
        f.handle_chunk_error(None, &bus);
        f.bootstrap(&config(10, true), &bus);

        assert!(!f.is_error());
        assert_eq!(f.generation(), 2);
        assert_eq!(f.progress(), 0.0);
        assert!(!f.is_current(&stale));
        assert_eq!(f.chunks().len(), 2);
    }

    #[test]
    fn snapshot_reports_chunk_states() {
        let bus = EventBus::new(64);
        let mut f = file(20);
        f.bootstrap(&config(10, true), &bus);
        f.chunk_mut(0).unwrap().begin(false);
        f.set_paused(true);

        let snap = f.snapshot();
        assert_eq!(snap.unique_id(), "data-id");
        assert!(snap.paused);
        assert!(snap.uploading);
        assert!(!snap.complete);
        assert_eq!(
            snap.chunks,
            vec![ChunkStatus::Uploading, ChunkStatus::Pending]
        );
    }
}
