/// Audio-specific errors
use thiserror::Error;

/// Result type alias using `AudioError`
pub type Result<T> = std::result::Result<T, AudioError>;

/// Audio error types
#[derive(Error, Debug)]
pub enum AudioError {
    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Container or codec is not recognized
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Decoding failed partway through the stream
    #[error("Corrupt stream: {0}")]
    CorruptStream(String),

    /// Seek error
    #[error("Seek error: {0}")]
    SeekError(String),

    /// Resampler could not be built or failed while processing
    #[error("Resampling error: {0}")]
    Resampling(String),

    /// Invalid stream parameters (zero channels, zero sample rate, ...)
    #[error("Invalid stream spec: {0}")]
    InvalidSpec(String),

    /// Analyzer or equalizer settings that cannot work
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AudioError {
    /// Whether this error ends the current track but not the session
    pub fn is_per_track(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound(_) | Self::UnsupportedFormat(_) | Self::CorruptStream(_)
        )
    }
}
