//! Core types for transport state and status reporting

use retro_audio::{EqualizerState, Track};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Nothing is playing; position is 0
    Stopped,

    /// Currently playing
    Playing,

    /// Paused mid-track (also the state right after `load`)
    Paused,

    /// Waiting for the decoder to reposition
    Seeking,
}

impl PlaybackState {
    /// Whether the sink should be pulling audio
    pub fn is_audible(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// Repeat mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Stop when the playlist ends
    #[default]
    Off,

    /// Loop the entire playlist
    All,

    /// Loop the current track only
    One,
}

impl std::str::FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "all" => Ok(Self::All),
            "one" => Ok(Self::One),
            other => Err(format!("unknown repeat mode '{}'", other)),
        }
    }
}

/// Point-in-time view of the player, returned by `Player::status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub state: PlaybackState,

    /// Audible position within the current track
    pub position: Duration,

    /// Duration of the current track, if known
    pub duration: Option<Duration>,

    /// Current track
    pub track: Option<Track>,

    /// Index of the current track in the playlist
    pub playlist_index: Option<usize>,

    pub playlist_len: usize,

    /// Volume (0-100)
    pub volume: u8,

    pub muted: bool,

    /// Gains the equalizer is converging to
    pub equalizer: EqualizerState,

    pub repeat: RepeatMode,

    pub shuffle: bool,

    /// Buffers the sink filled with silence because the queue was empty
    pub underruns: u64,

    /// Last human-readable problem, if any
    pub message: Option<String>,
}

impl PlayerStatus {
    /// Fraction of the track played, in [0, 1]
    pub fn progress(&self) -> Option<f64> {
        let duration = self.duration?;
        if duration.is_zero() {
            return None;
        }
        Some((self.position.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0))
    }
}
