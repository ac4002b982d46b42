//! Expansion of dropped items into files.
//!
//! A dropped directory is walked lazily: one directory is open at a time and
//! subdirectories are queued until the current one is exhausted. Relative
//! paths start with the dropped directory's own name and always use `/`.

use std::fs::ReadDir;
use std::path::{Path, PathBuf};

use resumable_transfer::{FileSource, TransferError, validate_upload_path};

use crate::error::UploadError;

/// Something the user dropped onto the uploader.
#[derive(Debug, Clone)]
pub enum DroppedItem {
    File(FileSource),
    Directory(PathBuf),
}

/// Starts walking `root`. Fails if `root` is not a readable directory.
pub fn walk_directory(root: &Path) -> Result<DirectoryWalk, UploadError> {
    let metadata = std::fs::metadata(root)?;
    if !metadata.is_dir() {
        return Err(TransferError::InvalidPath(format!("not a directory: {}", root.display())).into());
    }

    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::InvalidPath(root.display().to_string()))?;

    Ok(DirectoryWalk {
        pending: vec![(root.to_path_buf(), format!("{name}/"))],
        current: None,
    })
}

/// Lazy iterator over the regular files below a directory.
///
/// Yields each file once with its relative path set. Entries that are
/// neither files nor directories (sockets, dangling links) are skipped.
#[derive(Debug)]
pub struct DirectoryWalk {
    pending: Vec<(PathBuf, String)>,
    current: Option<(ReadDir, String)>,
}

impl Iterator for DirectoryWalk {
    type Item = Result<FileSource, UploadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some((entries, prefix)) = self.current.as_mut() else {
                let (dir, prefix) = self.pending.pop()?;
                match std::fs::read_dir(&dir) {
                    Ok(entries) => self.current = Some((entries, prefix)),
                    Err(e) => return Some(Err(e.into())),
                }
                continue;
            };

            let next = entries.next();
            let prefix = prefix.clone();
            let entry = match next {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    self.current = None;
                    continue;
                }
            };

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => return Some(Err(e.into())),
            };
            let relative = format!("{prefix}{}", entry.file_name().to_string_lossy());

            if metadata.is_dir() {
                self.pending.push((entry.path(), format!("{relative}/")));
                continue;
            }
            if !metadata.is_file() {
                continue;
            }

            return Some(visit_file(&entry.path(), relative));
        }
    }
}

fn visit_file(path: &Path, relative: String) -> Result<FileSource, UploadError> {
    validate_upload_path(&relative)?;
    let source = FileSource::from_path(path)?;
    Ok(source.with_relative_path(relative))
}
