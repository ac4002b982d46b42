//! Scripted transport and event helpers shared by the engine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::events::UploadEvent;
use crate::transport::{BoxFuture, ChunkRequest, ChunkTransport, SendOutcome, TestOutcome};

type ChunkId = (String, usize);

/// Transport that succeeds unless told otherwise.
///
/// Outcomes can be queued per `(unique id, offset)` and win over everything
/// else. A held send or test parks until its cancellation token fires and
/// then reports `Aborted`.
#[derive(Default)]
pub(crate) struct MockTransport {
    supports_test: bool,
    scripts: Mutex<HashMap<ChunkId, VecDeque<SendOutcome>>>,
    existing: Mutex<HashSet<ChunkId>>,
    requests: Mutex<Vec<ChunkRequest>>,
    tested: Mutex<Vec<ChunkId>>,
    hold: AtomicBool,
    held_files: Mutex<HashSet<String>>,
    hold_tests: AtomicBool,
    progress_steps: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    aborted: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_existence_test() -> Self {
        Self {
            supports_test: true,
            ..Self::default()
        }
    }

    pub(crate) fn script(&self, unique_id: &str, offset: usize, outcomes: Vec<SendOutcome>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((unique_id.to_string(), offset), outcomes.into());
    }

    pub(crate) fn mark_existing(&self, unique_id: &str, offset: usize) {
        self.existing
            .lock()
            .unwrap()
            .insert((unique_id.to_string(), offset));
    }

    pub(crate) fn set_hold(&self, hold: bool) {
        self.hold.store(hold, Ordering::SeqCst);
    }

    /// Holds every send for one file only.
    pub(crate) fn hold_file(&self, unique_id: &str) {
        self.held_files.lock().unwrap().insert(unique_id.to_string());
    }

    pub(crate) fn set_test_hold(&self, hold: bool) {
        self.hold_tests.store(hold, Ordering::SeqCst);
    }

    /// Report progress this many times per send before resolving.
    pub(crate) fn set_progress_steps(&self, steps: u64) {
        self.progress_steps.store(steps, Ordering::SeqCst);
    }

    pub(crate) fn requests(&self) -> Vec<ChunkRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn sent_offsets(&self, unique_id: &str) -> Vec<usize> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.file().unique_id == unique_id)
            .map(ChunkRequest::offset)
            .collect()
    }

    pub(crate) fn tested_offsets(&self, unique_id: &str) -> Vec<usize> {
        self.tested
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == unique_id)
            .map(|(_, offset)| *offset)
            .collect()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, id: &ChunkId) -> Option<SendOutcome> {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(VecDeque::pop_front)
    }

    fn is_held(&self, unique_id: &str) -> bool {
        self.hold.load(Ordering::SeqCst) || self.held_files.lock().unwrap().contains(unique_id)
    }

    async fn transfer(&self, request: &ChunkRequest) -> SendOutcome {
        let id = (request.file().unique_id.clone(), request.offset());
        if let Some(outcome) = self.next_outcome(&id) {
            return outcome;
        }

        if self.is_held(&id.0) {
            request.cancellation().cancelled().await;
            return SendOutcome::Aborted;
        }

        let payload = match request.payload().await {
            Ok(payload) => payload,
            Err(e) => return SendOutcome::permanent(Some(json!(e.to_string()))),
        };

        let steps = self.progress_steps.load(Ordering::SeqCst);
        let width = payload.data.len() as u64;
        for step in 1..=steps {
            tokio::time::sleep(Duration::from_millis(1)).await;
            request.report_progress(width * step / steps);
        }

        if request.is_cancelled() {
            return SendOutcome::Aborted;
        }

        SendOutcome::Success(Some(json!({ "chunk": request.number() })))
    }
}

impl ChunkTransport for MockTransport {
    fn send_chunk(&self, request: ChunkRequest) -> BoxFuture<'_, SendOutcome> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;

            let outcome = self.transfer(&request).await;
            if outcome == SendOutcome::Aborted {
                self.aborted.fetch_add(1, Ordering::SeqCst);
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        })
    }

    fn test_chunk(&self, request: ChunkRequest) -> BoxFuture<'_, TestOutcome> {
        Box::pin(async move {
            let id = (request.file().unique_id.clone(), request.offset());
            self.tested.lock().unwrap().push(id.clone());
            tokio::task::yield_now().await;

            if self.hold_tests.load(Ordering::SeqCst) {
                request.cancellation().cancelled().await;
                return TestOutcome::Aborted;
            }

            if request.is_cancelled() {
                TestOutcome::Aborted
            } else if self.existing.lock().unwrap().contains(&id) {
                TestOutcome::Exists(None)
            } else {
                TestOutcome::Missing
            }
        })
    }

    fn supports_existence_test(&self) -> bool {
        self.supports_test
    }
}

/// Everything already queued on `rx`.
pub(crate) fn drain(rx: &mut broadcast::Receiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

/// Receives until `done` matches, returning every event seen including the
/// matching one. Panics after five seconds.
pub(crate) async fn wait_for<F>(rx: &mut broadcast::Receiver<UploadEvent>, mut done: F) -> Vec<UploadEvent>
where
    F: FnMut(&UploadEvent) -> bool,
{
    let mut seen = Vec::new();
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let matched = done(&event);
                    seen.push(event);
                    if matched {
                        return;
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for event");
    seen
}

/// Polls `condition` until it holds. Panics after five seconds.
pub(crate) async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), poll)
        .await
        .expect("timed out waiting for condition");
}

pub(crate) fn count(events: &[UploadEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name() == name).count()
}
