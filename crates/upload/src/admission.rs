//! Admission of selected files into the engine.
//!
//! Each batch goes through the max-files cap, per-file validation, id
//! generation and duplicate detection. Admitted files are chunked right away
//! and appended in selection order.

use std::sync::Arc;

use resumable_transfer::FileSource;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::engine::Engine;
use crate::error::UploadError;
use crate::events::{FileInfo, UploadEvent};
use crate::file::UploadFile;
use crate::scanner::{DroppedItem, walk_directory};

/// Callbacks for files refused at admission.
///
/// Every method has a default that logs a warning, so implementors only
/// override what they want to surface to users.
pub trait AdmissionHooks: Send + Sync {
    fn too_many_files(&self, files: &[FileSource], max_files: usize) {
        warn!(
            count = files.len(),
            max_files, "please upload no more than {max_files} file(s) at a time"
        );
    }

    fn file_too_small(&self, file: &FileSource, min_file_size: u64) {
        warn!(
            file = %file.path(),
            size = file.size(),
            "file is too small, please upload files of at least {min_file_size} bytes"
        );
    }

    fn file_too_large(&self, file: &FileSource, max_file_size: u64) {
        warn!(
            file = %file.path(),
            size = file.size(),
            "file is too large, please upload files of at most {max_file_size} bytes"
        );
    }

    fn file_type_not_allowed(&self, file: &FileSource, file_types: &[String]) {
        warn!(
            file = %file.path(),
            allowed = ?file_types,
            "file type not allowed"
        );
    }
}

/// Hooks that only log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHooks;

impl AdmissionHooks for LogHooks {}

/// Why a file was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RejectReason {
    #[error("more than {max_files} files")]
    TooManyFiles { max_files: usize },

    #[error("smaller than {min_file_size} bytes")]
    TooSmall { min_file_size: u64 },

    #[error("larger than {max_file_size} bytes")]
    TooLarge { max_file_size: u64 },

    #[error("type not in {allowed:?}")]
    TypeNotAllowed { allowed: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedFile {
    pub path: String,
    pub size: u64,
    pub reason: RejectReason,
}

impl RejectedFile {
    fn new(source: &FileSource, reason: RejectReason) -> Self {
        Self {
            path: source.path().to_string(),
            size: source.size(),
            reason,
        }
    }
}

/// A file whose id could not be generated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedFile {
    pub path: String,
    pub error: String,
}

/// Outcome of one admission batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdmissionReport {
    pub added: Vec<Arc<FileInfo>>,
    /// Already present under the same id.
    pub skipped: Vec<Arc<FileInfo>>,
    pub rejected: Vec<RejectedFile>,
    pub failed: Vec<FailedFile>,
}

/// Checks a file against the type and size limits.
pub fn check_file(file: &FileSource, config: &UploadConfig) -> Result<(), RejectReason> {
    if !config.file_types.is_empty() && !has_allowed_type(&file.name, &config.file_types) {
        return Err(RejectReason::TypeNotAllowed {
            allowed: config.file_types.clone(),
        });
    }

    let size = file.size();
    if let Some(min_file_size) = config.min_file_size
        && size < min_file_size
    {
        return Err(RejectReason::TooSmall { min_file_size });
    }
    if let Some(max_file_size) = config.max_file_size
        && size > max_file_size
    {
        return Err(RejectReason::TooLarge { max_file_size });
    }
    Ok(())
}

/// Case-insensitive extension match. Types may be given with or without
/// the leading dot.
fn has_allowed_type(name: &str, file_types: &[String]) -> bool {
    let name = name.to_lowercase();
    file_types.iter().any(|file_type| {
        let extension = file_type.trim_start_matches('.').to_lowercase();
        name.strip_suffix(&extension)
            .is_some_and(|stem| stem.ends_with('.'))
    })
}

impl Engine {
    fn notify_rejection(&self, file: &FileSource, reason: &RejectReason) {
        let hooks = &self.shared().hooks;
        match reason {
            RejectReason::TooManyFiles { .. } => {}
            RejectReason::TooSmall { min_file_size } => hooks.file_too_small(file, *min_file_size),
            RejectReason::TooLarge { max_file_size } => hooks.file_too_large(file, *max_file_size),
            RejectReason::TypeNotAllowed { allowed } => hooks.file_type_not_allowed(file, allowed),
        }
    }

    /// Admits one file.
    pub async fn add_file(&self, file: FileSource) -> AdmissionReport {
        self.add_files(vec![file]).await
    }

    /// Admits a batch of files.
    ///
    /// A batch that would push the engine past `max_files` is refused as a
    /// whole, except that a single-file engine replaces its file when given
    /// exactly one new one.
    pub async fn add_files(&self, files: Vec<FileSource>) -> AdmissionReport {
        let shared = self.shared();
        let config = &shared.config;
        let mut report = AdmissionReport::default();
        if files.is_empty() {
            return report;
        }

        if let Some(max_files) = config.max_files {
            let mut state = self.state();
            let present = state.files.len();
            if max_files < files.len() + present {
                if max_files == 1 && present == 1 && files.len() == 1 {
                    let mut replaced = state.files.remove(0);
                    replaced.detach();
                    debug!(file = %replaced.unique_id(), "replacing single file");
                } else {
                    drop(state);
                    shared.hooks.too_many_files(&files, max_files);
                    report.rejected = files
                        .iter()
                        .map(|f| RejectedFile::new(f, RejectReason::TooManyFiles { max_files }))
                        .collect();
                    return report;
                }
            }
        }

        for source in files {
            if let Err(reason) = check_file(&source, config) {
                debug!(file = %source.path(), %reason, "file rejected");
                self.notify_rejection(&source, &reason);
                report.rejected.push(RejectedFile::new(&source, reason));
                continue;
            }

            let unique_id = match shared.ids.generate(&source).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(file = %source.path(), error = %e, "unique id generation failed");
                    self.emit(UploadEvent::Error {
                        path: source.path().to_string(),
                        message: e.to_string(),
                    });
                    report.failed.push(FailedFile {
                        path: source.path().to_string(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            let info = Arc::new(FileInfo::new(unique_id, &source));
            let mut state = self.state();
            if state.position(&info.unique_id).is_some() {
                debug!(file = %info.unique_id, "duplicate file skipped");
                report.skipped.push(info);
                continue;
            }

            self.emit(UploadEvent::ChunkingStart {
                file: Arc::clone(&info),
            });
            let key = state.next_key();
            let mut file = UploadFile::new(key, Arc::clone(&info), source);
            file.bootstrap(config, &shared.events);
            state.files.push(file);
            drop(state);

            info!(file = %info.unique_id, size = info.size, "file added");
            self.emit(UploadEvent::FileAdded {
                file: Arc::clone(&info),
            });
            report.added.push(info);
        }

        if !report.added.is_empty() || !report.skipped.is_empty() {
            self.emit(UploadEvent::FilesAdded {
                added: report.added.clone(),
                skipped: report.skipped.clone(),
            });
        }
        report
    }

    /// Admits a picker selection, emptying it afterwards when `clear_input`
    /// is set.
    pub async fn add_selection(&self, selection: &mut Vec<FileSource>) -> AdmissionReport {
        let files = if self.config().clear_input {
            std::mem::take(selection)
        } else {
            selection.clone()
        };
        self.add_files(files).await
    }

    /// Admits dropped files and the contents of dropped directories.
    ///
    /// Fails if a dropped directory cannot be walked; nothing is admitted
    /// in that case.
    pub async fn add_dropped(&self, items: Vec<DroppedItem>) -> Result<AdmissionReport, UploadError> {
        if items.is_empty() {
            return Ok(AdmissionReport::default());
        }
        self.emit(UploadEvent::BeforeAdd);

        let mut files = Vec::new();
        for item in items {
            match item {
                DroppedItem::File(source) => files.push(source),
                DroppedItem::Directory(path) => {
                    let found = tokio::task::spawn_blocking(move || {
                        walk_directory(&path)?.collect::<Result<Vec<_>, _>>()
                    })
                    .await??;
                    files.extend(found);
                }
            }
        }

        if files.is_empty() {
            return Ok(AdmissionReport::default());
        }
        Ok(self.add_files(files).await)
    }
}
