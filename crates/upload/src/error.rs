//! Upload engine error types.

/// Errors produced by the upload engine.
///
/// Transfer failures reported by a transport are not errors here: they are
/// retried or surfaced as [`UploadEvent::FileError`](crate::UploadEvent).
/// These are integration and I/O problems of the host.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] resumable_transfer::TransferError),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("chunk testing is enabled but the transport cannot test chunks")]
    MissingTestHandler,

    #[error("unique id generation failed: {0}")]
    IdGeneration(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
