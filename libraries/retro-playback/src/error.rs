//! Error types for the playback pipeline

use retro_audio::AudioError;
use thiserror::Error;

/// Playback errors
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// Container or codec not recognized; the track is skipped
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Decoding failed partway through; the track is cut short
    #[error("Corrupt stream: {0}")]
    CorruptStream(String),

    /// Output device could not be opened or was lost
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The frame queue had nothing ready before the deadline.
    ///
    /// Recovered internally with silence; never returned from the public
    /// API.
    #[error("Frame queue timed out")]
    QueueTimeout,

    /// File does not exist
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// No track is currently loaded
    #[error("No track loaded")]
    NoTrackLoaded,

    /// Playlist has no entries
    #[error("Playlist is empty")]
    PlaylistEmpty,

    /// Index out of bounds
    #[error("Index out of bounds: {0}")]
    IndexOutOfBounds(usize),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// The transport worker has shut down
    #[error("Player has shut down")]
    Disconnected,

    /// Other audio-layer failure
    #[error("Audio error: {0}")]
    Audio(String),
}

impl PlaybackError {
    /// One line suitable for a status bar
    pub fn user_message(&self) -> String {
        match self {
            Self::UnsupportedFormat(_) => "This file format is not supported".to_string(),
            Self::CorruptStream(_) => "The file is damaged; playback stopped early".to_string(),
            Self::DeviceUnavailable(_) => "No audio output device is available".to_string(),
            Self::QueueTimeout => "Playback stuttered".to_string(),
            Self::FileNotFound(path) => format!("File not found: {}", path),
            Self::NoTrackLoaded => "Nothing to play".to_string(),
            Self::PlaylistEmpty => "The playlist is empty".to_string(),
            Self::IndexOutOfBounds(_) => "That playlist entry does not exist".to_string(),
            Self::InvalidOperation(what) => what.clone(),
            Self::Config(what) => format!("Bad setting: {}", what),
            Self::Disconnected => "The player has stopped".to_string(),
            Self::Audio(_) => "Audio error".to_string(),
        }
    }

    /// Whether the failure belongs to one track rather than the session
    pub fn is_per_track(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_) | Self::CorruptStream(_) | Self::FileNotFound(_)
        )
    }
}

impl From<AudioError> for PlaybackError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::UnsupportedFormat(msg) => Self::UnsupportedFormat(msg),
            AudioError::CorruptStream(msg) => Self::CorruptStream(msg),
            AudioError::FileNotFound(path) => Self::FileNotFound(path),
            AudioError::InvalidConfig(msg) | AudioError::InvalidSpec(msg) => Self::Config(msg),
            other => Self::Audio(other.to_string()),
        }
    }
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_errors_keep_their_category() {
        let err: PlaybackError = AudioError::UnsupportedFormat("x.wma".into()).into();
        assert!(matches!(err, PlaybackError::UnsupportedFormat(_)));

        let err: PlaybackError = AudioError::CorruptStream("bad packet".into()).into();
        assert!(matches!(err, PlaybackError::CorruptStream(_)));

        let err: PlaybackError = AudioError::SeekError("nope".into()).into();
        assert!(matches!(err, PlaybackError::Audio(_)));
    }

    #[test]
    fn user_messages_hide_internal_detail() {
        let err = PlaybackError::UnsupportedFormat("symphonia: probe failed at 0x1f".into());
        assert!(!err.user_message().contains("0x1f"));

        let err = PlaybackError::DeviceUnavailable("ALSA: snd_pcm_open -16".into());
        assert_eq!(err.user_message(), "No audio output device is available");
    }

    #[test]
    fn per_track_errors() {
        assert!(PlaybackError::CorruptStream(String::new()).is_per_track());
        assert!(!PlaybackError::DeviceUnavailable(String::new()).is_per_track());
    }
}
