//! PCM frame types shared by every pipeline stage

use crate::error::{AudioError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default number of sample frames per [`AudioFrame`] (~23 ms at 44.1 kHz)
pub const DEFAULT_FRAME_LEN: usize = 1024;

/// Sample rate and channel layout of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSpec {
    /// Samples per second per channel
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl StreamSpec {
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || sample_rate > 768_000 {
            return Err(AudioError::InvalidSpec(format!(
                "sample rate {} Hz out of range",
                sample_rate
            )));
        }
        if channels == 0 || channels > 8 {
            return Err(AudioError::InvalidSpec(format!(
                "{} channels out of range",
                channels
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
        })
    }

    /// 44.1 kHz stereo
    pub fn cd() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
        }
    }

    /// Convert a count of sample frames to wall time
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }

    /// Convert wall time to a count of sample frames (rounded down)
    pub fn duration_to_frames(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * f64::from(self.sample_rate)) as u64
    }
}

impl Default for StreamSpec {
    fn default() -> Self {
        Self::cd()
    }
}

/// Fixed-size block of interleaved PCM produced by a decoder
///
/// Samples are shared behind an `Arc` so the frame can be handed between
/// threads without copying. A frame is never mutated after the decoder
/// builds it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    spec: StreamSpec,
    index: u64,
    position: u64,
}

impl AudioFrame {
    /// Build a frame from interleaved samples.
    ///
    /// `index` counts frames emitted since the decoder was opened or last
    /// repositioned; `position` is the track offset of the first sample, in
    /// sample frames.
    pub fn new(samples: Vec<f32>, spec: StreamSpec, index: u64, position: u64) -> Self {
        debug_assert_eq!(samples.len() % usize::from(spec.channels), 0);
        Self {
            samples: samples.into(),
            spec,
            index,
            position,
        }
    }

    /// A frame of digital silence
    pub fn silence(spec: StreamSpec, frames: usize, index: u64, position: u64) -> Self {
        Self::new(
            vec![0.0; frames * usize::from(spec.channels)],
            spec,
            index,
            position,
        )
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    pub fn channels(&self) -> u16 {
        self.spec.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Track offset of the first sample, in sample frames
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.spec.channels)
    }

    /// Track offset just past the last sample, in sample frames
    pub fn end_position(&self) -> u64 {
        self.position + self.frames() as u64
    }

    /// Playback time of the first sample
    pub fn timestamp(&self) -> Duration {
        self.spec.frames_to_duration(self.position)
    }

    /// Wall time covered by this frame
    pub fn duration(&self) -> Duration {
        self.spec.frames_to_duration(self.frames() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_rejects_zero_rate_and_channels() {
        assert!(StreamSpec::new(0, 2).is_err());
        assert!(StreamSpec::new(44_100, 0).is_err());
        assert!(StreamSpec::new(48_000, 2).is_ok());
    }

    #[test]
    fn frame_positions_are_in_sample_frames() {
        let spec = StreamSpec::new(48_000, 2).unwrap();
        let frame = AudioFrame::new(vec![0.25; 960], spec, 3, 48_000);

        assert_eq!(frame.frames(), 480);
        assert_eq!(frame.end_position(), 48_480);
        assert_eq!(frame.timestamp(), Duration::from_secs(1));
        assert_eq!(frame.duration(), Duration::from_millis(10));
    }

    #[test]
    fn duration_frame_conversion_matches() {
        let spec = StreamSpec::cd();
        assert_eq!(spec.duration_to_frames(Duration::from_millis(500)), 22_050);
        assert_eq!(spec.frames_to_duration(44_100), Duration::from_secs(1));
    }

    #[test]
    fn silence_is_all_zero() {
        let frame = AudioFrame::silence(StreamSpec::cd(), 64, 0, 0);
        assert_eq!(frame.samples().len(), 128);
        assert!(frame.samples().iter().all(|&s| s == 0.0));
    }
}
