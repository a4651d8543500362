/// Three-band equalizer
///
/// Bass is a low shelf, mid a peaking filter and treble a high shelf. The
/// three biquads run in series on every channel.
///
/// Gains are set from the UI thread through an [`EqualizerControl`] and
/// picked up by the audio thread at frame boundaries via [`Equalizer::sync`].
/// All three gains travel in one atomic word, so the audio thread never sees
/// a mix of old and new settings.
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lowest accepted gain in dB
pub const MIN_GAIN_DB: f32 = -12.0;
/// Highest accepted gain in dB
pub const MAX_GAIN_DB: f32 = 12.0;

/// Bass shelf corner frequency
pub const BASS_FREQUENCY: f32 = 80.0;
/// Mid peak center frequency
pub const MID_FREQUENCY: f32 = 1000.0;
/// Mid peak Q
pub const MID_Q: f32 = 1.0;
/// Treble shelf corner frequency
pub const TREBLE_FREQUENCY: f32 = 8000.0;

/// Largest channel count the filters keep state for
const MAX_CHANNELS: usize = 8;

/// Smoothing coefficient for exponential coefficient interpolation.
/// At 44.1 kHz this is a time constant of roughly 11 ms.
const SMOOTH_COEFF: f32 = 0.002;

/// User-facing gain settings in dB
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerState {
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
}

impl EqualizerState {
    /// Build a state; out-of-range and NaN gains are clamped
    pub fn new(bass: f32, mid: f32, treble: f32) -> Self {
        Self { bass, mid, treble }.clamped()
    }

    pub fn flat() -> Self {
        Self::default()
    }

    /// Same settings with every gain forced into range
    pub fn clamped(self) -> Self {
        Self {
            bass: sanitize_gain(self.bass),
            mid: sanitize_gain(self.mid),
            treble: sanitize_gain(self.treble),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.bass == 0.0 && self.mid == 0.0 && self.treble == 0.0
    }

    /// Pack as three centi-dB values in one word
    fn pack(self) -> u64 {
        let s = self.clamped();
        let enc = |g: f32| u64::from((g * 100.0).round() as i16 as u16);
        enc(s.bass) | (enc(s.mid) << 16) | (enc(s.treble) << 32)
    }

    fn unpack(word: u64) -> Self {
        let dec = |shift: u32| f32::from(((word >> shift) & 0xffff) as u16 as i16) / 100.0;
        Self {
            bass: dec(0),
            mid: dec(16),
            treble: dec(32),
        }
    }
}

fn sanitize_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(MIN_GAIN_DB, MAX_GAIN_DB)
    }
}

/// Control-side handle to an equalizer's gains
///
/// Cheap to clone. There should be one writer (the UI/transport thread);
/// any number of [`Equalizer`]s may read.
#[derive(Debug, Clone)]
pub struct EqualizerControl {
    word: Arc<AtomicU64>,
}

impl EqualizerControl {
    pub fn new(initial: EqualizerState) -> Self {
        Self {
            word: Arc::new(AtomicU64::new(initial.pack())),
        }
    }

    /// Publish new gains. Returns the settings actually applied after
    /// clamping and quantization to 0.01 dB.
    pub fn set(&self, state: EqualizerState) -> EqualizerState {
        let word = state.pack();
        self.word.store(word, Ordering::Release);
        EqualizerState::unpack(word)
    }

    pub fn get(&self) -> EqualizerState {
        EqualizerState::unpack(self.word.load(Ordering::Acquire))
    }

    fn load_word(&self) -> u64 {
        self.word.load(Ordering::Acquire)
    }
}

impl Default for EqualizerControl {
    fn default() -> Self {
        Self::new(EqualizerState::flat())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FilterKind {
    LowShelf,
    Peaking,
    HighShelf,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

/// Biquad with coefficient smoothing
///
/// New coefficients are set as targets; the active set glides toward them
/// once per sample frame, so a gain change never steps the output.
#[derive(Debug, Clone)]
struct BiquadFilter {
    kind: FilterKind,
    frequency: f32,
    q: f32,

    target: [f32; 5],
    active: [f32; 5],
    state: [ChannelState; MAX_CHANNELS],
}

const NEUTRAL: [f32; 5] = [1.0, 0.0, 0.0, 0.0, 0.0];

impl BiquadFilter {
    fn new(kind: FilterKind, frequency: f32, q: f32) -> Self {
        Self {
            kind,
            frequency,
            q,
            target: NEUTRAL,
            active: NEUTRAL,
            state: [ChannelState::default(); MAX_CHANNELS],
        }
    }

    /// Recompute target coefficients (RBJ cookbook)
    fn configure(&mut self, sample_rate: u32, gain_db: f32) {
        let sample_rate = sample_rate as f32;
        if sample_rate < 1.0 {
            return;
        }

        // Keep the corner well below Nyquist at low sample rates
        let frequency = self.frequency.min(sample_rate * 0.45);
        let a = 10.0_f32.powf(gain_db / 40.0);
        let omega = 2.0 * std::f32::consts::PI * frequency / sample_rate;
        let (sin_omega, cos_omega) = omega.sin_cos();

        let (b0, b1, b2, a0, a1, a2) = match self.kind {
            FilterKind::Peaking => {
                let alpha = sin_omega / (2.0 * self.q);
                (
                    1.0 + alpha * a,
                    -2.0 * cos_omega,
                    1.0 - alpha * a,
                    1.0 + alpha / a,
                    -2.0 * cos_omega,
                    1.0 - alpha / a,
                )
            }
            FilterKind::LowShelf => {
                let alpha = sin_omega / 2.0 * ((a + 1.0 / a) * (1.0 / self.q - 1.0) + 2.0).sqrt();
                let beta = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_omega + beta),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
                    a * ((a + 1.0) - (a - 1.0) * cos_omega - beta),
                    (a + 1.0) + (a - 1.0) * cos_omega + beta,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
                    (a + 1.0) + (a - 1.0) * cos_omega - beta,
                )
            }
            FilterKind::HighShelf => {
                let alpha = sin_omega / 2.0 * ((a + 1.0 / a) * (1.0 / self.q - 1.0) + 2.0).sqrt();
                let beta = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_omega + beta),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
                    a * ((a + 1.0) + (a - 1.0) * cos_omega - beta),
                    (a + 1.0) - (a - 1.0) * cos_omega + beta,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
                    (a + 1.0) - (a - 1.0) * cos_omega - beta,
                )
            }
        };

        self.target = [b0 / a0, b1 / a0, b2 / a0, a1 / a0, a2 / a0];
    }

    #[inline]
    fn smooth_coefficients(&mut self) {
        for (active, target) in self.active.iter_mut().zip(self.target) {
            *active += SMOOTH_COEFF * (target - *active);
        }
    }

    #[inline]
    fn process_sample(&mut self, channel: usize, input: f32) -> f32 {
        let [b0, b1, b2, a1, a2] = self.active;
        let s = &mut self.state[channel];

        let mut output = b0 * input + b1 * s.x1 + b2 * s.x2 - a1 * s.y1 - a2 * s.y2;
        // Flush denormals
        if output.abs() < 1e-15 {
            output = 0.0;
        }

        s.x2 = s.x1;
        s.x1 = input;
        s.y2 = s.y1;
        s.y1 = output;
        output
    }

    /// Clear history and snap to the target coefficients
    fn reset(&mut self) {
        self.state = [ChannelState::default(); MAX_CHANNELS];
        self.active = self.target;
    }
}

/// Audio-thread side of the equalizer
///
/// Owns filter state; never shared between threads. Processing does not
/// allocate.
#[derive(Debug, Clone)]
pub struct Equalizer {
    control: EqualizerControl,
    seen: u64,
    applied: EqualizerState,
    sample_rate: u32,
    channels: usize,
    bass: BiquadFilter,
    mid: BiquadFilter,
    treble: BiquadFilter,
}

impl Equalizer {
    /// Build an equalizer reading gains from `control`.
    ///
    /// The filters start at the current gains with no glide.
    pub fn new(control: EqualizerControl, sample_rate: u32, channels: u16) -> Self {
        let seen = control.load_word();
        let applied = EqualizerState::unpack(seen);
        let mut eq = Self {
            control,
            seen,
            applied,
            sample_rate,
            channels: usize::from(channels).clamp(1, MAX_CHANNELS),
            bass: BiquadFilter::new(FilterKind::LowShelf, BASS_FREQUENCY, 0.707),
            mid: BiquadFilter::new(FilterKind::Peaking, MID_FREQUENCY, MID_Q),
            treble: BiquadFilter::new(FilterKind::HighShelf, TREBLE_FREQUENCY, 0.707),
        };
        eq.configure();
        eq.reset();
        eq
    }

    /// Gains the filters are currently heading toward
    pub fn applied(&self) -> EqualizerState {
        self.applied
    }

    /// Pick up new gains from the control handle.
    ///
    /// Call only between frames. Returns `true` if the gains changed.
    pub fn sync(&mut self) -> bool {
        let word = self.control.load_word();
        if word == self.seen {
            return false;
        }
        self.seen = word;
        self.applied = EqualizerState::unpack(word);
        self.configure();
        true
    }

    /// Filter interleaved samples in place and clamp to [-1, 1]
    pub fn process(&mut self, samples: &mut [f32]) {
        let channels = self.channels;
        for frame in samples.chunks_exact_mut(channels) {
            self.bass.smooth_coefficients();
            self.mid.smooth_coefficients();
            self.treble.smooth_coefficients();

            for (ch, sample) in frame.iter_mut().enumerate() {
                let mut s = self.bass.process_sample(ch, *sample);
                s = self.mid.process_sample(ch, s);
                s = self.treble.process_sample(ch, s);
                *sample = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            }
        }
    }

    /// [`sync`](Self::sync) then [`process`](Self::process) one whole frame
    pub fn process_frame(&mut self, samples: &mut [f32]) {
        self.sync();
        self.process(samples);
    }

    /// Clear filter history, e.g. after a seek or track change
    pub fn reset(&mut self) {
        self.bass.reset();
        self.mid.reset();
        self.treble.reset();
    }

    fn configure(&mut self) {
        self.bass.configure(self.sample_rate, self.applied.bass);
        self.mid.configure(self.sample_rate, self.applied.mid);
        self.treble.configure(self.sample_rate, self.applied.treble);
    }
}
