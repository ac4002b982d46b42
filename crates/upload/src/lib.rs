//! Resumable chunked upload engine.
//!
//! Files are cut into fixed-size byte ranges that are transferred
//! independently through a host-supplied [`ChunkTransport`]. The engine
//! tracks per-chunk and per-file progress, retries transient failures,
//! supports pause, resume and cancel, and reports everything through
//! [`UploadEvent`]s.
//!
//! Resuming across sessions relies on the server: with
//! [`UploadConfig::test_chunks`] the engine asks the transport whether each
//! chunk already exists before sending it.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use resumable_upload::*;
//! # async fn run(transport: Arc<dyn ChunkTransport>) -> Result<(), UploadError> {
//! let engine = Engine::new(UploadConfig::default(), transport)?;
//! let mut events = engine.subscribe();
//!
//! engine.add_file(FileSource::from_path("video.mp4".as_ref())?).await;
//! engine.upload()?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let UploadEvent::Complete = event {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod admission;
mod chunk;
mod config;
mod engine;
mod error;
mod events;
mod file;
mod ids;
mod scanner;
mod schedule;
mod transport;

#[cfg(test)]
mod test_support;

pub use admission::{AdmissionHooks, AdmissionReport, FailedFile, LogHooks, RejectReason, RejectedFile, check_file};
pub use chunk::ChunkStatus;
pub use config::{ParameterNames, UploadConfig, UploadGuard};
pub use engine::{Engine, EngineBuilder};
pub use error::UploadError;
pub use events::{FileInfo, UploadEvent};
pub use file::FileSnapshot;
pub use ids::{ContentHashIds, IdGenerator, NameSizeIds};
pub use scanner::{DirectoryWalk, DroppedItem, walk_directory};
pub use transport::{BoxFuture, ChunkPayload, ChunkRequest, ChunkTransport, SendOutcome, TestOutcome};

pub use resumable_transfer::{Blob, FileSource};
