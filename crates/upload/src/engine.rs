//! Upload engine: owns the files, fills upload slots and exposes the
//! control surface.
//!
//! There is no scheduler loop. [`Engine::upload`] makes one dispatch attempt
//! per slot and every chunk resolution makes another one to refill the slot
//! it freed. All state lives behind one mutex that is never held across an
//! `.await`; transport calls run as spawned tasks whose returned outcome is
//! fed back into the engine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::admission::{AdmissionHooks, LogHooks};
use crate::chunk::{Begin, ChunkKey, ChunkStatus, SendResolution, TestResolution, request_params};
use crate::config::{UploadConfig, UploadGuard};
use crate::error::UploadError;
use crate::events::{EventBus, UploadEvent};
use crate::file::{FileSnapshot, UploadFile};
use crate::ids::{IdGenerator, NameSizeIds};
use crate::schedule::next_chunk;
use crate::transport::{ChunkRequest, ChunkTransport, ProgressHandle, SendOutcome, TestOutcome};

pub(crate) struct Shared {
    pub(crate) config: UploadConfig,
    pub(crate) transport: Arc<dyn ChunkTransport>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) hooks: Arc<dyn AdmissionHooks>,
    pub(crate) events: EventBus,
    pub(crate) state: Mutex<EngineState>,
}

pub(crate) struct EngineState {
    pub(crate) files: Vec<UploadFile>,
    next_key: u64,
    complete_announced: bool,
    /// Set by `pause`, cleared by `upload`. No chunk starts while set.
    paused: bool,
}

impl EngineState {
    pub(crate) fn next_key(&mut self) -> u64 {
        self.next_key += 1;
        self.next_key
    }

    pub(crate) fn position(&self, unique_id: &str) -> Option<usize> {
        self.files.iter().position(|f| f.unique_id() == unique_id)
    }

    fn position_current(&self, key: &ChunkKey) -> Option<usize> {
        self.files.iter().position(|f| f.is_current(key))
    }

    fn is_uploading(&self, guard: UploadGuard) -> bool {
        match guard {
            UploadGuard::Every => self.files.iter().all(UploadFile::is_uploading),
            UploadGuard::Any => self.files.iter().any(UploadFile::is_uploading),
        }
    }

    fn is_complete(&self) -> bool {
        self.files.iter().all(UploadFile::is_complete)
    }

    fn in_flight(&self) -> usize {
        self.files.iter().map(UploadFile::in_flight).sum()
    }

    fn size(&self) -> u64 {
        self.files.iter().map(UploadFile::size).sum()
    }

    /// Size-weighted average of file progress.
    fn progress(&mut self) -> f64 {
        let total = self.size();
        if total == 0 {
            return 0.0;
        }
        let done: f64 = self
            .files
            .iter_mut()
            .map(|f| f.progress() * f.size() as f64)
            .sum();
        done / total as f64
    }
}

/// Handle to an upload engine. Clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: UploadConfig,
    transport: Arc<dyn ChunkTransport>,
    ids: Option<Arc<dyn IdGenerator>>,
    hooks: Option<Arc<dyn AdmissionHooks>>,
}

impl EngineBuilder {
    /// Replaces the default [`NameSizeIds`] generator.
    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// Replaces the default [`LogHooks`].
    pub fn hooks(mut self, hooks: impl AdmissionHooks + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    pub fn build(self) -> Result<Engine, UploadError> {
        self.config.validate()?;

        let events = EventBus::new(self.config.event_capacity);
        Ok(Engine {
            shared: Arc::new(Shared {
                config: self.config,
                transport: self.transport,
                ids: self.ids.unwrap_or_else(|| Arc::new(NameSizeIds)),
                hooks: self.hooks.unwrap_or_else(|| Arc::new(LogHooks)),
                events,
                state: Mutex::new(EngineState {
                    files: Vec::new(),
                    next_key: 0,
                    complete_announced: false,
                    paused: false,
                }),
            }),
        })
    }
}

impl Engine {
    pub fn builder(config: UploadConfig, transport: Arc<dyn ChunkTransport>) -> EngineBuilder {
        EngineBuilder {
            config,
            transport,
            ids: None,
            hooks: None,
        }
    }

    /// Engine with default id generation and admission hooks.
    pub fn new(config: UploadConfig, transport: Arc<dyn ChunkTransport>) -> Result<Self, UploadError> {
        Self::builder(config, transport).build()
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, EngineState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: UploadEvent) {
        self.shared.events.emit(event);
    }

    /// Subscribes to engine events. Each receiver sees every event emitted
    /// after it was created.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &UploadConfig {
        &self.shared.config
    }

    /// Snapshots of all files, in insertion order.
    pub fn files(&self) -> Vec<FileSnapshot> {
        self.state()
            .files
            .iter_mut()
            .map(UploadFile::snapshot)
            .collect()
    }

    pub fn file(&self, unique_id: &str) -> Option<FileSnapshot> {
        self.state()
            .files
            .iter_mut()
            .find(|f| f.unique_id() == unique_id)
            .map(UploadFile::snapshot)
    }

    pub fn file_count(&self) -> usize {
        self.state().files.len()
    }

    /// Total bytes across all files.
    pub fn size(&self) -> u64 {
        self.state().size()
    }

    /// Whether an upload is running, as judged by the configured
    /// [`UploadGuard`].
    pub fn is_uploading(&self) -> bool {
        self.state().is_uploading(self.shared.config.upload_guard)
    }

    pub fn is_complete(&self) -> bool {
        self.state().is_complete()
    }

    /// Overall progress in `[0, 1]`, weighted by file size.
    pub fn progress(&self) -> f64 {
        self.state().progress()
    }

    /// Starts or resumes uploading.
    ///
    /// Does nothing if an upload is already running. Fails when existence
    /// testing is enabled but the transport cannot test chunks.
    pub fn upload(&self) -> Result<(), UploadError> {
        let config = &self.shared.config;
        if config.test_chunks && !self.shared.transport.supports_existence_test() {
            return Err(UploadError::MissingTestHandler);
        }

        let mut state = self.state();
        // Chunks still winding down after a pause refill their slots once
        // their aborted outcomes arrive.
        state.paused = false;
        if state.is_uploading(config.upload_guard) {
            debug!("upload already running");
            return Ok(());
        }

        state.complete_announced = false;
        info!(
            files = state.files.len(),
            slots = config.simultaneous_uploads,
            "upload started"
        );
        self.emit(UploadEvent::UploadStart);

        for _ in 0..config.simultaneous_uploads {
            self.dispatch_next(&mut state);
        }
        Ok(())
    }

    /// Stops every in-flight transfer. Interrupted chunks go back to pending
    /// and are sent again on the next [`upload`](Self::upload).
    pub fn pause(&self) {
        let mut state = self.state();
        state.paused = true;
        for file in &mut state.files {
            file.abort(&self.shared.events);
        }
        info!("upload paused");
        self.emit(UploadEvent::Pause);
    }

    /// Cancels and removes every file.
    pub fn cancel(&self) {
        let mut state = self.state();
        self.emit(UploadEvent::BeforeCancel);
        // Nothing is left to refill freed slots with.
        while let Some(mut file) = state.files.pop() {
            file.cancel(&self.shared.events);
        }
        info!("upload cancelled");
        self.emit(UploadEvent::Cancel);
    }

    /// Removes every file unless an upload is running. Returns whether the
    /// engine was cleared.
    pub fn reset(&self) -> bool {
        let mut state = self.state();
        if state.is_uploading(self.shared.config.upload_guard) {
            debug!("reset refused while uploading");
            return false;
        }
        for mut file in state.files.drain(..) {
            file.detach();
        }
        state.complete_announced = false;
        true
    }

    /// Sets a file's pause flag. Paused files receive no new chunks from the
    /// regular dispatch pass; chunks already in flight keep going.
    pub fn set_file_paused(&self, unique_id: &str, paused: bool) -> bool {
        let mut state = self.state();
        let Some(index) = state.position(unique_id) else {
            return false;
        };
        state.files[index].set_paused(paused);
        debug!(file = %unique_id, paused, "file pause flag changed");
        true
    }

    /// Restarts a file from scratch and resumes uploading.
    pub fn retry_file(&self, unique_id: &str) -> Result<bool, UploadError> {
        {
            let mut state = self.state();
            let Some(index) = state.position(unique_id) else {
                return Ok(false);
            };
            let file = &mut state.files[index];
            file.abort(&self.shared.events);
            file.bootstrap(&self.shared.config, &self.shared.events);
            info!(file = %unique_id, "retrying file");
        }

        self.upload()?;
        Ok(true)
    }

    /// Cancels one file and hands its slots to the others.
    pub fn cancel_file(&self, unique_id: &str) -> bool {
        let mut state = self.state();
        let Some(index) = state.position(unique_id) else {
            return false;
        };

        let mut file = state.files.remove(index);
        let aborted = file.cancel(&self.shared.events);
        info!(file = %unique_id, aborted, "file cancelled");

        for _ in 0..aborted {
            self.dispatch_next(&mut state);
        }
        self.emit_overall(&mut state);
        true
    }

    /// Removes a file without emitting anything.
    pub fn remove_file(&self, unique_id: &str) -> bool {
        let mut state = self.state();
        let Some(index) = state.position(unique_id) else {
            return false;
        };
        state.files.remove(index).detach();
        debug!(file = %unique_id, "file removed");
        true
    }

    fn emit_overall(&self, state: &mut EngineState) {
        let progress = state.progress();
        self.emit(UploadEvent::Progress { progress });
    }

    /// Starts the next pending chunk if a slot is free. Announces completion
    /// when nothing is left.
    fn dispatch_next(&self, state: &mut EngineState) -> bool {
        let config = &self.shared.config;
        if state.paused {
            return false;
        }

        let in_flight = state.in_flight();
        if in_flight >= config.simultaneous_uploads {
            debug!(in_flight, "all upload slots busy");
            return false;
        }

        if let Some(slot) = next_chunk(&state.files, config.prioritize_first_and_last_chunk) {
            self.start_chunk(state, slot.file, slot.chunk);
            return true;
        }

        if state.is_complete() && !state.complete_announced {
            state.complete_announced = true;
            info!(files = state.files.len(), "all uploads complete");
            self.emit(UploadEvent::Complete);
        }
        false
    }

    fn start_chunk(&self, state: &mut EngineState, index: usize, offset: usize) {
        let events = &self.shared.events;
        let file = &mut state.files[index];
        let Some(chunk) = file.chunk_mut(offset) else {
            return;
        };

        match chunk.begin(self.shared.config.test_chunks) {
            Begin::Test(token) => {
                let Some((key, request)) = self.request(file, offset, token) else {
                    return;
                };
                debug!(file = %file.unique_id(), offset, "testing chunk");
                self.spawn_test(key, request);
            }
            Begin::Send(token) => {
                file.handle_chunk_progress(events);
                let Some((key, request)) = self.request(file, offset, token) else {
                    return;
                };
                debug!(file = %file.unique_id(), offset, attempt = key.attempt, "sending chunk");
                self.spawn_send(key, request);
            }
        }
    }

    /// Continues a chunk that is between steps, or parks it as pending
    /// while the engine is paused.
    fn continue_chunk(&self, state: &mut EngineState, index: usize, offset: usize) {
        if !state.paused {
            self.start_chunk(state, index, offset);
        } else if let Some(chunk) = state.files[index].chunk_mut(offset) {
            debug!(offset, "engine paused, chunk left pending");
            chunk.release();
        }
    }

    fn request(
        &self,
        file: &UploadFile,
        offset: usize,
        token: CancellationToken,
    ) -> Option<(ChunkKey, ChunkRequest)> {
        let config = &self.shared.config;
        let chunk = file.chunks().get(offset)?;
        let key = file.chunk_key(offset)?;
        let info = file.info();

        let content_type = (config.set_chunk_type_from_file && !info.mime_type.is_empty())
            .then(|| info.mime_type.clone());
        let params = request_params(
            &config.parameters,
            config.layout(file.size()).chunk_size(),
            chunk,
            info,
            file.chunks().len(),
        );

        let request = ChunkRequest {
            file: Arc::clone(info),
            offset,
            range: chunk.range(),
            params,
            content_type,
            blob: file.source().blob.clone(),
            cancel: token,
            progress: ProgressHandle::new(Arc::downgrade(&self.shared), key),
        };
        Some((key, request))
    }

    fn spawn_send(&self, key: ChunkKey, request: ChunkRequest) {
        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = engine.shared.transport.send_chunk(request).await;
            engine.complete_send(key, outcome);
        });
    }

    fn spawn_test(&self, key: ChunkKey, request: ChunkRequest) {
        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = engine.shared.transport.test_chunk(request).await;
            engine.complete_test(key, outcome);
        });
    }

    fn spawn_retry(&self, key: ChunkKey, delay: Duration, token: CancellationToken) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => engine.retry_fired(key),
                _ = token.cancelled() => engine.complete_send(key, SendOutcome::Aborted),
            }
        });
    }

    pub(crate) fn complete_send(&self, key: ChunkKey, outcome: SendOutcome) {
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(index) = state.position_current(&key) else {
            debug!(offset = key.offset, attempt = key.attempt, "stale send completion ignored");
            return;
        };

        let config = &self.shared.config;
        let events = &self.shared.events;
        let file = &mut state.files[index];
        let Some(chunk) = file.chunk_mut(key.offset) else {
            return;
        };

        match chunk.resolve_send(outcome, config.max_chunk_retries) {
            SendResolution::Succeeded(response) => {
                if file.handle_chunk_success(response, events) {
                    info!(file = %file.unique_id(), "file upload complete");
                }
                self.emit_overall(state);
                self.dispatch_next(state);
            }
            SendResolution::Failed(response) => {
                let aborted = file.handle_chunk_error(response, events);
                self.emit_overall(state);
                for _ in 0..=aborted {
                    self.dispatch_next(state);
                }
            }
            SendResolution::Retry { attempt } => {
                debug!(file = %file.unique_id(), offset = key.offset, attempt, "chunk failed, retrying");
                file.handle_chunk_retry(key.offset, attempt, events);

                match config.chunk_retry_interval() {
                    Some(delay) if !state.paused => {
                        let Some(chunk) = file.chunk_mut(key.offset) else {
                            return;
                        };
                        let token = chunk.schedule_retry();
                        let Some(key) = file.chunk_key(key.offset) else {
                            return;
                        };
                        self.spawn_retry(key, delay, token);
                    }
                    _ => self.continue_chunk(state, index, key.offset),
                }
            }
            SendResolution::Aborted => {
                debug!(file = %file.unique_id(), offset = key.offset, "chunk aborted");
                self.dispatch_next(state);
            }
        }
    }

    pub(crate) fn complete_test(&self, key: ChunkKey, outcome: TestOutcome) {
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(index) = state.position_current(&key) else {
            debug!(offset = key.offset, attempt = key.attempt, "stale test completion ignored");
            return;
        };

        let events = &self.shared.events;
        let file = &mut state.files[index];
        let Some(chunk) = file.chunk_mut(key.offset) else {
            return;
        };

        match chunk.resolve_test(outcome) {
            TestResolution::Exists(response) => {
                debug!(file = %file.unique_id(), offset = key.offset, "chunk already on server");
                if file.handle_chunk_success(response, events) {
                    info!(file = %file.unique_id(), "file upload complete");
                }
                self.emit_overall(state);
                self.dispatch_next(state);
            }
            TestResolution::Missing => self.continue_chunk(state, index, key.offset),
            TestResolution::Aborted => {
                debug!(file = %file.unique_id(), offset = key.offset, "chunk test aborted");
                self.dispatch_next(state);
            }
        }
    }

    fn retry_fired(&self, key: ChunkKey) {
        let mut state = self.state();
        match state.position_current(&key) {
            Some(index) => self.continue_chunk(&mut state, index, key.offset),
            None => debug!(offset = key.offset, "stale retry timer ignored"),
        }
    }

    pub(crate) fn chunk_progress(&self, key: ChunkKey, loaded: u64) {
        let mut guard = self.state();
        let state = &mut *guard;
        let Some(index) = state.position_current(&key) else {
            return;
        };

        let file = &mut state.files[index];
        let Some(chunk) = file.chunk_mut(key.offset) else {
            return;
        };
        if chunk.status() != ChunkStatus::Uploading || chunk.is_pending_retry() {
            return;
        }

        if chunk.record_progress(loaded) {
            file.handle_chunk_progress(&self.shared.events);
            self.emit_overall(state);
        }
    }
}
