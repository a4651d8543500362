//! Volume control with logarithmic scaling
//!
//! Volume range is 0-100%, mapped to -60 dB to 0 dB. The control side is an
//! atomic shared with the sink feed; the feed ramps between gains across one
//! buffer so volume changes do not click.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const MUTED_BIT: u32 = 1 << 8;

/// Default volume level
pub const DEFAULT_VOLUME: u8 = 80;

/// Convert a volume percentage to linear gain
///
/// - 0%   → silence
/// - 50%  → -30 dB → 0.0316
/// - 80%  → -12 dB → 0.251
/// - 100% →   0 dB → 1.0
pub fn level_to_gain(level: u8) -> f32 {
    let level = level.min(100);
    if level == 0 {
        return 0.0;
    }
    let db = (f32::from(level) - 100.0) * 0.6;
    10.0_f32.powf(db / 20.0)
}

/// Shared volume setting
///
/// Cheap to clone; the transport writes, the sink feed reads.
#[derive(Debug, Clone)]
pub struct VolumeControl {
    word: Arc<AtomicU32>,
}

impl VolumeControl {
    pub fn new(level: u8) -> Self {
        Self {
            word: Arc::new(AtomicU32::new(u32::from(level.min(100)))),
        }
    }

    /// Set volume level (0-100), keeping the mute flag
    pub fn set_level(&self, level: u8) -> u8 {
        let level = level.min(100);
        let muted = self.word.load(Ordering::Relaxed) & MUTED_BIT;
        self.word.store(muted | u32::from(level), Ordering::Release);
        level
    }

    pub fn level(&self) -> u8 {
        (self.word.load(Ordering::Acquire) & 0xff) as u8
    }

    pub fn set_muted(&self, muted: bool) {
        if muted {
            self.word.fetch_or(MUTED_BIT, Ordering::AcqRel);
        } else {
            self.word.fetch_and(!MUTED_BIT, Ordering::AcqRel);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.word.load(Ordering::Acquire) & MUTED_BIT != 0
    }

    /// Linear gain, 0.0 when muted
    pub fn gain(&self) -> f32 {
        let word = self.word.load(Ordering::Acquire);
        if word & MUTED_BIT != 0 {
            0.0
        } else {
            level_to_gain((word & 0xff) as u8)
        }
    }

    /// Current setting in dB, -60 when muted or at 0%
    pub fn to_db(&self) -> f32 {
        let gain = self.gain();
        if gain == 0.0 {
            -60.0
        } else {
            20.0 * gain.log10()
        }
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME)
    }
}

/// Audio-thread side: applies the control's gain with a linear ramp
#[derive(Debug, Clone)]
pub struct VolumeRamp {
    control: VolumeControl,
    current: f32,
}

impl VolumeRamp {
    pub fn new(control: VolumeControl) -> Self {
        let current = control.gain();
        Self { control, current }
    }

    /// Scale interleaved `buffer` in place, gliding from the last applied
    /// gain to the control's gain over the buffer
    pub fn apply(&mut self, buffer: &mut [f32], channels: usize) {
        let target = self.control.gain();
        let channels = channels.max(1);

        if (target - self.current).abs() < 1e-6 {
            if target == 0.0 {
                buffer.fill(0.0);
            } else if target != 1.0 {
                for sample in buffer.iter_mut() {
                    *sample *= target;
                }
            }
            self.current = target;
            return;
        }

        let frames = (buffer.len() / channels).max(1);
        let step = (target - self.current) / frames as f32;
        let mut gain = self.current;
        for frame in buffer.chunks_mut(channels) {
            gain += step;
            for sample in frame {
                *sample *= gain;
            }
        }
        self.current = target;
    }
}
