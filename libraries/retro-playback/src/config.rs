/// Player configuration
use crate::error::{PlaybackError, Result};
use crate::types::RepeatMode;
use retro_audio::{EqualizerState, SpectrumConfig, StreamSpec, DEFAULT_FRAME_LEN};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest crossfade accepted
pub const MAX_CROSSFADE_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlayerConfig {
    #[serde(default)]
    pub playback: PlaybackSettings,

    #[serde(default)]
    pub equalizer: EqualizerState,

    #[serde(default)]
    pub spectrum: SpectrumConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlaybackSettings {
    /// Initial volume (0-100)
    #[serde(default = "default_volume")]
    pub volume: u8,

    #[serde(default)]
    pub repeat: RepeatMode,

    #[serde(default)]
    pub shuffle: bool,

    /// Sample frames per decoded AudioFrame
    #[serde(default = "default_frame_len")]
    pub frame_len: usize,

    /// Audio buffered between decoder and sink
    #[serde(default = "default_queue_ms")]
    pub queue_ms: u64,

    /// Output rate used when the sink does not dictate one
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Overlap of outgoing and incoming track on next, previous or select
    /// while playing, in milliseconds (0 = hard cut)
    #[serde(default)]
    pub crossfade_ms: u64,
}

fn default_volume() -> u8 {
    80
}

fn default_frame_len() -> usize {
    DEFAULT_FRAME_LEN
}

fn default_queue_ms() -> u64 {
    200
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u16 {
    2
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            repeat: RepeatMode::Off,
            shuffle: false,
            frame_len: default_frame_len(),
            queue_ms: default_queue_ms(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            crossfade_ms: 0,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            playback: PlaybackSettings::default(),
            equalizer: EqualizerState::flat(),
            spectrum: SpectrumConfig::default(),
        }
    }
}

impl PlaybackSettings {
    pub fn stream_spec(&self) -> Result<StreamSpec> {
        Ok(StreamSpec::new(self.sample_rate, self.channels)?)
    }

    /// Frame Queue capacity in frames for a stream at `sample_rate`.
    ///
    /// Always at least two so the decoder can work one frame ahead.
    pub fn queue_frames(&self, sample_rate: u32) -> usize {
        let samples = Duration::from_millis(self.queue_ms).as_secs_f64() * f64::from(sample_rate);
        let frames = (samples / self.frame_len.max(1) as f64).ceil() as usize;
        frames.max(2)
    }
}

impl PlayerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.playback.volume > 100 {
            return Err(PlaybackError::Config(format!(
                "volume must be 0-100, got {}",
                self.playback.volume
            )));
        }

        if !(64..=16_384).contains(&self.playback.frame_len) {
            return Err(PlaybackError::Config(format!(
                "frame_len must be in 64..=16384, got {}",
                self.playback.frame_len
            )));
        }

        if !(20..=5_000).contains(&self.playback.queue_ms) {
            return Err(PlaybackError::Config(format!(
                "queue_ms must be in 20..=5000, got {}",
                self.playback.queue_ms
            )));
        }

        if self.playback.crossfade_ms > MAX_CROSSFADE_MS {
            return Err(PlaybackError::Config(format!(
                "crossfade_ms must be at most {}, got {}",
                MAX_CROSSFADE_MS, self.playback.crossfade_ms
            )));
        }

        self.playback.stream_spec()?;
        self.spectrum.validate()?;

        Ok(())
    }
}
