//! Engine configuration.
//!
//! Configuration is plain data and can be stored as TOML. Everything that
//! is behavior rather than data (transport, id generation, validation
//! hooks) is attached through [`EngineBuilder`](crate::EngineBuilder).

use std::path::Path;
use std::time::Duration;

use resumable_transfer::{ChunkLayout, DEFAULT_CHUNK_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Upload engine configuration. Immutable once the engine is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Nominal chunk width in bytes.
    pub chunk_size: u64,

    /// Keep every chunk at most `chunk_size` wide. When off, the last chunk
    /// absorbs the remainder and may be up to twice as wide.
    pub force_chunk_size: bool,

    /// Maximum number of chunk transfers in flight at once.
    pub simultaneous_uploads: usize,

    /// Ask the transport whether a chunk already exists before sending it.
    pub test_chunks: bool,

    /// Send the first and last chunk of every file before anything else.
    pub prioritize_first_and_last_chunk: bool,

    pub min_file_size: Option<u64>,
    pub max_file_size: Option<u64>,

    /// Maximum number of files held by the engine.
    pub max_files: Option<usize>,

    /// Transient failures tolerated per chunk before it fails permanently.
    pub max_chunk_retries: u32,

    /// Delay before a failed chunk is resent. `None` resends immediately.
    pub chunk_retry_interval_ms: Option<u64>,

    /// Minimum spacing between forwarded transport progress ticks.
    pub throttle_progress_callbacks_ms: u64,

    /// Empty the caller's selection after it has been admitted.
    pub clear_input: bool,

    /// Tag chunk payloads with the file's MIME type.
    pub set_chunk_type_from_file: bool,

    /// Allowed file extensions without the dot. Empty allows any.
    pub file_types: Vec<String>,

    /// Names of the request parameters handed to the transport.
    pub parameters: ParameterNames,

    /// When `upload()` treats an upload as already running.
    pub upload_guard: UploadGuard,

    /// Buffered events per subscriber before slow receivers lag.
    pub event_capacity: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            force_chunk_size: true,
            simultaneous_uploads: 3,
            test_chunks: true,
            prioritize_first_and_last_chunk: false,
            min_file_size: None,
            max_file_size: None,
            max_files: None,
            max_chunk_retries: 2,
            chunk_retry_interval_ms: None,
            throttle_progress_callbacks_ms: 1,
            clear_input: true,
            set_chunk_type_from_file: false,
            file_types: Vec::new(),
            parameters: ParameterNames::default(),
            upload_guard: UploadGuard::default(),
            event_capacity: 1024,
        }
    }
}

impl UploadConfig {
    /// Parses a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, UploadError> {
        let config: UploadConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file.
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "upload configuration loaded");
        Ok(config)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.simultaneous_uploads == 0 {
            return Err(UploadError::InvalidConfig(
                "simultaneous_uploads must be at least 1".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(UploadError::InvalidConfig(
                "event_capacity must be at least 1".into(),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_file_size, self.max_file_size)
            && min > max
        {
            return Err(UploadError::InvalidConfig(format!(
                "min_file_size {min} exceeds max_file_size {max}"
            )));
        }
        Ok(())
    }

    /// Chunk layout for a file of `file_size` bytes.
    pub fn layout(&self, file_size: u64) -> ChunkLayout {
        ChunkLayout::new(file_size, self.chunk_size, self.force_chunk_size)
    }

    pub fn chunk_retry_interval(&self) -> Option<Duration> {
        self.chunk_retry_interval_ms.map(Duration::from_millis)
    }

    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_progress_callbacks_ms)
    }
}

/// Which files must be mid-upload for `upload()` to be a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadGuard {
    /// Every file has a chunk in flight (an engine without files counts).
    #[default]
    Every,
    /// At least one file has a chunk in flight.
    Any,
}

/// Request parameter names, each prefixed with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterNames {
    pub prefix: String,
    pub chunk_number: String,
    pub chunk_size: String,
    pub current_chunk_size: String,
    pub total_size: String,
    pub file_type: String,
    pub identifier: String,
    pub file_name: String,
    pub relative_path: String,
    pub total_chunks: String,
}

impl Default for ParameterNames {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            chunk_number: "resumableChunkNumber".into(),
            chunk_size: "resumableChunkSize".into(),
            current_chunk_size: "resumableCurrentChunkSize".into(),
            total_size: "resumableTotalSize".into(),
            file_type: "resumableType".into(),
            identifier: "resumableId".into(),
            file_name: "resumableFileName".into(),
            relative_path: "resumableRelativePath".into(),
            total_chunks: "resumableTotalChunks".into(),
        }
    }
}

impl ParameterNames {
    /// Full parameter name for `field`.
    pub fn name(&self, field: &str) -> String {
        format!("{}{field}", self.prefix)
    }
}
