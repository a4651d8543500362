//! Spectrum analysis for the visualizer
//!
//! The audio path pushes equalized samples into a [`SpectrumTap`]. It never
//! waits: when the tap is full the extra samples are dropped. The
//! visualization loop drains the matching [`SpectrumTapReader`] into a
//! [`SpectrumAnalyzer`], which keeps a rolling window of the newest samples
//! and turns it into a [`SpectrumSnapshot`] on demand.

use crate::error::{AudioError, Result};
use crate::frame::StreamSpec;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Analyzer tuning. None of these are part of any contract; they only
/// change how the bars look.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// FFT length and rolling window size, power of two
    pub fft_size: usize,
    /// Number of visualizer bars
    pub bars: usize,
    /// Lower edge of the first bar in Hz
    pub min_frequency: f32,
    /// Upper edge of the last bar in Hz (capped below Nyquist)
    pub max_frequency: f32,
    /// Fraction of the previous bar value kept per update, in [0, 1)
    pub decay: f32,
    /// Level in dBFS that maps to an empty bar
    pub floor_db: f32,
    /// Snapshot cadence
    pub refresh_hz: u32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            bars: 24,
            min_frequency: 40.0,
            max_frequency: 16_000.0,
            decay: 0.7,
            floor_db: -60.0,
            refresh_hz: 30,
        }
    }
}

impl SpectrumConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() || !(256..=16_384).contains(&self.fft_size) {
            return Err(AudioError::InvalidConfig(format!(
                "fft_size must be a power of two in 256..=16384, got {}",
                self.fft_size
            )));
        }
        if !(1..=128).contains(&self.bars) {
            return Err(AudioError::InvalidConfig(format!(
                "bars must be in 1..=128, got {}",
                self.bars
            )));
        }
        let range_ok = self.min_frequency > 0.0 && self.max_frequency > self.min_frequency;
        if !range_ok {
            return Err(AudioError::InvalidConfig(format!(
                "frequency range {}..{} Hz is empty",
                self.min_frequency, self.max_frequency
            )));
        }
        if !(0.0..1.0).contains(&self.decay) {
            return Err(AudioError::InvalidConfig(format!(
                "decay must be in [0, 1), got {}",
                self.decay
            )));
        }
        if self.floor_db.is_nan() || self.floor_db >= 0.0 {
            return Err(AudioError::InvalidConfig(format!(
                "floor_db must be negative, got {}",
                self.floor_db
            )));
        }
        if !(1..=240).contains(&self.refresh_hz) {
            return Err(AudioError::InvalidConfig(format!(
                "refresh_hz must be in 1..=240, got {}",
                self.refresh_hz
            )));
        }
        Ok(())
    }

    /// Largest change a single update can make to any bar
    pub fn max_step(&self) -> f32 {
        1.0 - self.decay
    }

    /// Time between snapshots
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.refresh_hz.max(1)))
    }
}

/// One visualizer update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumSnapshot {
    /// Bar heights in [0, 1], lowest frequency first
    pub bars: Vec<f32>,
    /// RMS level of the analysis window
    pub rms: f32,
    /// Playback position the window ends at
    pub position: Duration,
    /// Increments with every snapshot from the same analyzer
    pub sequence: u64,
}

impl SpectrumSnapshot {
    /// Highest bar
    pub fn peak(&self) -> f32 {
        self.bars.iter().copied().fold(0.0, f32::max)
    }
}

/// Create the lock-free link between the audio path and the analyzer
///
/// `capacity_frames` bounds how much audio can wait for the analyzer.
pub fn spectrum_tap(channels: u16, capacity_frames: usize) -> (SpectrumTap, SpectrumTapReader) {
    let channels = usize::from(channels.max(1));
    let ring = HeapRb::<f32>::new(capacity_frames.max(1) * channels);
    let (producer, consumer) = ring.split();
    (
        SpectrumTap { producer, channels },
        SpectrumTapReader {
            consumer,
            channels,
            scratch: vec![0.0; 1024 * channels],
        },
    )
}

/// Audio-thread end of the analyzer tap
pub struct SpectrumTap {
    producer: HeapProd<f32>,
    channels: usize,
}

impl SpectrumTap {
    /// Offer interleaved samples. Never blocks; whole sample frames that do
    /// not fit are dropped. Returns the number of samples accepted.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let room = self.producer.vacant_len() / self.channels * self.channels;
        let n = room.min(samples.len() / self.channels * self.channels);
        if n == 0 {
            return 0;
        }
        self.producer.push_slice(&samples[..n])
    }
}

/// Analyzer end of the tap
pub struct SpectrumTapReader {
    consumer: HeapCons<f32>,
    channels: usize,
    scratch: Vec<f32>,
}

impl SpectrumTapReader {
    /// Move everything waiting into `analyzer`. Audio older than one
    /// analysis window is skipped without being read.
    pub fn drain_into(&mut self, analyzer: &mut SpectrumAnalyzer) -> usize {
        let keep = analyzer.window_len() * self.channels;
        let waiting = self.consumer.occupied_len();
        if waiting > keep {
            let stale = (waiting - keep) / self.channels * self.channels;
            self.consumer.skip(stale);
        }

        let mut moved = 0;
        loop {
            let n = self.consumer.pop_slice(&mut self.scratch);
            if n == 0 {
                break;
            }
            analyzer.push_interleaved(&self.scratch[..n], self.channels);
            moved += n;
        }
        moved
    }

    /// Throw away anything waiting
    pub fn clear(&mut self) {
        self.consumer.clear();
    }
}

/// Windowed FFT with logarithmic bar grouping and decay smoothing
pub struct SpectrumAnalyzer {
    config: SpectrumConfig,
    sample_rate: u32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    window_gain: f32,
    /// Bin range `[start, end)` per bar
    bands: Vec<(usize, usize)>,
    history: VecDeque<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    bars: Vec<f32>,
    sequence: u64,
}

impl SpectrumAnalyzer {
    pub fn new(config: SpectrumConfig, spec: StreamSpec) -> Result<Self> {
        config.validate()?;

        let n = config.fft_size;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        // Periodic Hann
        let window: Vec<f32> = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos()))
            .collect();
        let window_gain = window.iter().sum::<f32>() / 2.0;

        let bands = log_bands(&config, spec.sample_rate);
        let bars = vec![0.0; config.bars];

        Ok(Self {
            sample_rate: spec.sample_rate,
            fft,
            window,
            window_gain,
            bands,
            history: VecDeque::with_capacity(n),
            buffer: vec![Complex::new(0.0, 0.0); n],
            scratch,
            bars,
            sequence: 0,
            config,
        })
    }

    pub fn config(&self) -> &SpectrumConfig {
        &self.config
    }

    /// Mono samples held in the rolling window
    pub fn window_len(&self) -> usize {
        self.config.fft_size
    }

    /// Append interleaved samples, downmixed to mono; oldest samples fall
    /// out of the window
    pub fn push_interleaved(&mut self, samples: &[f32], channels: usize) {
        let channels = channels.max(1);
        let n = self.config.fft_size;
        for frame in samples.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            if self.history.len() == n {
                self.history.pop_front();
            }
            self.history.push_back(mono);
        }
    }

    /// Analyze the current window and advance the smoothed bars one step
    pub fn analyze(&mut self, position: Duration) -> SpectrumSnapshot {
        let n = self.config.fft_size;
        let missing = n - self.history.len();

        let mut energy = 0.0_f32;
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < missing {
                0.0
            } else {
                self.history[i - missing]
            };
            energy += sample * sample;
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        let rms = (energy / n as f32).sqrt();

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let floor_db = self.config.floor_db;
        let keep = self.config.decay;
        for (bar, &(start, end)) in self.bars.iter_mut().zip(&self.bands) {
            let peak = self.buffer[start..end]
                .iter()
                .map(|c| c.norm() / self.window_gain)
                .fold(0.0_f32, f32::max);
            let db = 20.0 * peak.max(1e-10).log10();
            let target = ((db - floor_db) / -floor_db).clamp(0.0, 1.0);
            *bar = (keep * *bar + (1.0 - keep) * target).clamp(0.0, 1.0);
        }

        self.sequence += 1;
        SpectrumSnapshot {
            bars: self.bars.clone(),
            rms,
            position,
            sequence: self.sequence,
        }
    }

    /// Forget all audio and drop the bars to zero
    pub fn clear(&mut self) {
        self.history.clear();
        self.bars.iter_mut().for_each(|b| *b = 0.0);
    }

    /// Follow a change of sample rate
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.bands = log_bands(&self.config, sample_rate);
            self.clear();
        }
    }
}

/// Split `[min_frequency, max_frequency]` into geometrically spaced bars and
/// map each to a non-empty FFT bin range
fn log_bands(config: &SpectrumConfig, sample_rate: u32) -> Vec<(usize, usize)> {
    let n = config.fft_size;
    let nyquist_bin = n / 2;
    let bin_hz = sample_rate as f32 / n as f32;
    let max_freq = config.max_frequency.min(sample_rate as f32 * 0.5 * 0.95);
    let min_freq = config.min_frequency.min(max_freq * 0.5);
    let ratio = max_freq / min_freq;

    (0..config.bars)
        .map(|i| {
            let lo = min_freq * ratio.powf(i as f32 / config.bars as f32);
            let hi = min_freq * ratio.powf((i + 1) as f32 / config.bars as f32);
            let start = ((lo / bin_hz).floor() as usize).clamp(1, nyquist_bin - 1);
            let end = ((hi / bin_hz).ceil() as usize).clamp(start + 1, nyquist_bin);
            (start, end)
        })
        .collect()
}
