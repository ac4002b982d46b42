//! Unique id generation for admitted files.

use resumable_transfer::FileSource;

use crate::error::UploadError;
use crate::transport::BoxFuture;

/// Produces the id a file is tracked (and deduplicated) by.
///
/// Generation may be asynchronous, e.g. hashing content or asking a server.
pub trait IdGenerator: Send + Sync {
    fn generate<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, Result<String, UploadError>>;
}

/// Default ids: `name-relativePath-size-lastModified`, with the relative
/// path reduced to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameSizeIds;

impl NameSizeIds {
    pub fn id_for(source: &FileSource) -> String {
        let path: String = source
            .relative_path
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        format!(
            "{}-{}-{}-{}",
            source.name,
            path,
            source.size(),
            source.last_modified.unwrap_or(0)
        )
    }
}

impl IdGenerator for NameSizeIds {
    fn generate<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, Result<String, UploadError>> {
        let id = Self::id_for(source);
        Box::pin(async move { Ok(id) })
    }
}

/// Content-addressed ids: SHA-256 of the file, hex-encoded.
///
/// The same bytes get the same id whatever the file is called, so a renamed
/// copy is skipped as a duplicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHashIds;

impl IdGenerator for ContentHashIds {
    fn generate<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, Result<String, UploadError>> {
        let blob = source.blob.clone();
        Box::pin(async move {
            let checksum = tokio::task::spawn_blocking(move || blob.checksum()).await??;
            Ok(checksum)
        })
    }
}
