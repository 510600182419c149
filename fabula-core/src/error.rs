use thiserror::Error;

/// All errors produced by fabula-core.
#[derive(Debug, Error)]
pub enum FabulaError {
    /// Underlying byte-store I/O failed. Surfaced to the caller as-is; the
    /// cache never retries on its own.
    #[error("storage error: {0}")]
    Storage(String),

    /// The injected TTS generator failed (after whatever retries it runs
    /// internally). Propagated verbatim; the cache is left untouched.
    #[error("speech generation failed: {0}")]
    Generation(anyhow::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("audio engine error: {0}")]
    AudioEngine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FabulaError>;
