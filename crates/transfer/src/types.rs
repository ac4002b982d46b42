use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::TransferError;
use crate::chunked::{calculate_file_checksum, checksum_bytes};

/// Immutable bytes behind a selected file.
///
/// Cloning is cheap: in-memory data is shared, on-disk data is re-read per
/// range.
#[derive(Debug, Clone)]
pub enum Blob {
    /// Bytes already held in memory.
    Memory(Arc<[u8]>),
    /// A file on disk whose length was captured at selection time.
    Disk { path: PathBuf, size: u64 },
}

impl Blob {
    /// Total length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            Blob::Memory(data) => data.len() as u64,
            Blob::Disk { size, .. } => *size,
        }
    }

    /// Returns `true` for a zero-length blob.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the bytes in `range`, blocking the current thread for disk blobs.
    pub fn read_range(&self, range: Range<u64>) -> Result<Vec<u8>, TransferError> {
        let size = self.len();
        if range.start > range.end || range.end > size {
            return Err(TransferError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                size,
            });
        }

        match self {
            Blob::Memory(data) => Ok(data[range.start as usize..range.end as usize].to_vec()),
            Blob::Disk { path, .. } => {
                let mut file = std::fs::File::open(path)?;
                file.seek(SeekFrom::Start(range.start))?;
                let mut buf = vec![0u8; (range.end - range.start) as usize];
                file.read_exact(&mut buf)?;
                Ok(buf)
            }
        }
    }

    /// Reads the bytes in `range` without blocking the async runtime.
    pub async fn read_range_async(&self, range: Range<u64>) -> Result<Vec<u8>, TransferError> {
        match self {
            Blob::Memory(_) => self.read_range(range),
            Blob::Disk { .. } => {
                let blob = self.clone();
                tokio::task::spawn_blocking(move || blob.read_range(range)).await?
            }
        }
    }

    /// SHA-256 of the whole blob, hex-encoded.
    pub fn checksum(&self) -> Result<String, TransferError> {
        match self {
            Blob::Memory(data) => Ok(checksum_bytes(data)),
            Blob::Disk { path, .. } => calculate_file_checksum(path),
        }
    }
}

/// A file selected for upload, before it is admitted by the engine.
#[derive(Debug, Clone)]
pub struct FileSource {
    /// Base file name (`photo.jpg`).
    pub name: String,
    /// Path relative to the dropped directory; empty for loose files.
    pub relative_path: String,
    /// MIME type; empty when unknown.
    pub mime_type: String,
    /// Last modification time in milliseconds since the Unix epoch.
    pub last_modified: Option<u64>,
    pub blob: Blob,
}

impl FileSource {
    /// Wraps in-memory bytes.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let name = name.into();
        let data: Vec<u8> = data.into();
        Self {
            mime_type: detect_mime_type(&name).unwrap_or_default().to_string(),
            name,
            relative_path: String::new(),
            last_modified: None,
            blob: Blob::Memory(Arc::from(data)),
        }
    }

    /// Captures a file on disk. Only metadata is read here.
    pub fn from_path(path: &Path) -> Result<Self, TransferError> {
        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidPath(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidPath(path.display().to_string()))?;
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);

        Ok(Self {
            mime_type: detect_mime_type(&name).unwrap_or_default().to_string(),
            name,
            relative_path: String::new(),
            last_modified,
            blob: Blob::Disk {
                path: path.to_path_buf(),
                size: metadata.len(),
            },
        })
    }

    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = relative_path.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_last_modified(mut self, millis: u64) -> Self {
        self.last_modified = Some(millis);
        self
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.blob.len()
    }

    /// Relative path if one was recorded, otherwise the bare name.
    pub fn path(&self) -> &str {
        if self.relative_path.is_empty() {
            &self.name
        } else {
            &self.relative_path
        }
    }
}

/// Guesses a MIME type from the file extension (case-insensitive).
pub fn detect_mime_type(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        Some("mp4") => Some("video/mp4"),
        Some("webm") => Some("video/webm"),
        Some("mov") => Some("video/quicktime"),
        Some("mp3") => Some("audio/mpeg"),
        Some("pdf") => Some("application/pdf"),
        Some("zip") => Some("application/zip"),
        Some("json") => Some("application/json"),
        Some("txt") => Some("text/plain"),
        Some("csv") => Some("text/csv"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn memory_blob_reads_range() {
        let source = FileSource::from_bytes("a.bin", b"0123456789".to_vec());
        assert_eq!(source.size(), 10);
        assert_eq!(source.blob.read_range(2..5).unwrap(), b"234");
        assert_eq!(source.blob.read_range(10..10).unwrap(), b"");
    }

    #[test]
    fn range_past_end_rejected() {
        let source = FileSource::from_bytes("a.bin", b"abc".to_vec());
        let err = source.blob.read_range(1..4).unwrap_err();
        assert!(matches!(
            err,
            TransferError::RangeOutOfBounds { start: 1, end: 4, size: 3 }
        ));
    }

    #[test]
    fn disk_blob_reads_range() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "clip.mp4", b"AABBCCDDEE");

        let source = FileSource::from_path(&path).unwrap();
        assert_eq!(source.name, "clip.mp4");
        assert_eq!(source.mime_type, "video/mp4");
        assert_eq!(source.size(), 10);
        assert!(source.last_modified.is_some());
        assert_eq!(source.blob.read_range(4..8).unwrap(), b"CCDD");
    }

    #[tokio::test]
    async fn disk_blob_reads_range_async() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "data.bin", b"0123456789");

        let source = FileSource::from_path(&path).unwrap();
        let bytes = source.blob.read_range_async(6..10).await.unwrap();
        assert_eq!(bytes, b"6789");
    }

    #[test]
    fn from_path_rejects_directory() {
        let dir = TempDir::new().unwrap();
        let result = FileSource::from_path(dir.path());
        assert!(matches!(result, Err(TransferError::InvalidPath(_))));
    }

    #[test]
    fn path_falls_back_to_name() {
        let source = FileSource::from_bytes("a.txt", Vec::new());
        assert_eq!(source.path(), "a.txt");

        let nested = source.with_relative_path("docs/a.txt");
        assert_eq!(nested.path(), "docs/a.txt");
    }

    #[test]
    fn blob_checksum_matches_for_memory_and_disk() {
        let dir = TempDir::new().unwrap();
        let data = b"test content for checksum";
        let path = create_test_file(dir.path(), "test.bin", data);

        let disk = FileSource::from_path(&path).unwrap();
        let memory = FileSource::from_bytes("test.bin", data.to_vec());
        assert_eq!(disk.blob.checksum().unwrap(), memory.blob.checksum().unwrap());
    }

    #[test]
    fn detect_mime_type_known_and_unknown() {
        assert_eq!(detect_mime_type("IMAGE.PNG"), Some("image/png"));
        assert_eq!(detect_mime_type("photo.jpeg"), Some("image/jpeg"));
        assert_eq!(detect_mime_type("archive.tar.gz"), None);
        assert_eq!(detect_mime_type("noext"), None);
    }
}
