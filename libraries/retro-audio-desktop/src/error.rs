/// Audio output errors
use retro_playback::PlaybackError;
use thiserror::Error;

/// Result type for audio output operations
pub type Result<T> = std::result::Result<T, AudioOutputError>;

/// Audio output errors
#[derive(Debug, Error)]
pub enum AudioOutputError {
    /// No default output device
    #[error("No audio output device found")]
    DeviceNotFound,

    /// Named device not present on this host
    #[error("Audio device '{0}' not found")]
    NamedDeviceNotFound(String),

    /// Device error
    #[error("Device error: {0}")]
    DeviceError(String),

    /// Failed to enumerate devices
    #[error("Failed to enumerate audio devices: {0}")]
    EnumerationFailed(String),

    /// Failed to build output stream
    #[error("Failed to build output stream: {0}")]
    StreamBuildError(String),

    /// Failed to play stream
    #[error("Failed to play stream: {0}")]
    PlayError(String),

    /// Device only offers a sample format the output cannot write
    #[error("Unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    /// Output thread is gone
    #[error("Audio output thread stopped")]
    ThreadStopped,
}

impl From<cpal::BuildStreamError> for AudioOutputError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioOutputError::StreamBuildError(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioOutputError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioOutputError::PlayError(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioOutputError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioOutputError::DeviceError(err.to_string())
    }
}

impl From<cpal::DevicesError> for AudioOutputError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioOutputError::EnumerationFailed(err.to_string())
    }
}

impl From<AudioOutputError> for PlaybackError {
    fn from(err: AudioOutputError) -> Self {
        PlaybackError::DeviceUnavailable(err.to_string())
    }
}
