use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a relative upload path does not escape its root.
///
/// Relative paths are forwarded to the server as a request parameter, so a
/// directory walk must never produce one that climbs out of the dropped
/// directory.
///
/// Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_upload_path(file_path: &str) -> Result<(), TransferError> {
    if file_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(file_path);

    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {file_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {file_path}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {file_path}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {file_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_path() {
        assert!(validate_upload_path("").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_upload_path("../../../etc/passwd").is_err());
        assert!(validate_upload_path("photos/../../escape").is_err());
        assert!(validate_upload_path("..").is_err());
    }

    #[test]
    fn rejects_absolute_unix_path() {
        assert!(validate_upload_path("/tmp/malicious").is_err());
    }

    #[test]
    fn accepts_nested_relative_paths() {
        assert!(validate_upload_path("photo.jpg").is_ok());
        assert!(validate_upload_path("holiday/2024/photo.jpg").is_ok());
        assert!(validate_upload_path(".hidden/notes.txt").is_ok());
        assert!(validate_upload_path("./photo.jpg").is_ok());
    }
}
