//! Output sink interface
//!
//! Sinks pull: the device (or a paced thread standing in for one) asks the
//! [`SinkFeed`] for the next buffer whenever it needs one. The feed always
//! answers within the buffer's deadline, substituting silence if the
//! decoder has fallen behind.

use crate::error::{PlaybackError, Result};
use crate::feed::{FillStatus, SinkFeed};
use parking_lot::Mutex;
use retro_audio::StreamSpec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Audio output device abstraction
///
/// Implementations own whatever thread or callback drives the device and
/// call [`SinkFeed::fill`] from it.
pub trait AudioSink: Send {
    /// Sample rate and channel layout the device was opened with
    fn spec(&self) -> StreamSpec;

    /// Begin pulling from `feed`
    ///
    /// # Errors
    /// `DeviceUnavailable` if the device cannot be started.
    fn start(&mut self, feed: SinkFeed) -> Result<()>;

    /// Stop pulling and release the feed
    fn stop(&mut self);

    /// Human-readable device name
    fn name(&self) -> String {
        "audio output".to_string()
    }
}

/// Counters kept by [`NullSink`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullSinkStats {
    /// Buffers requested
    pub buffers: u64,
    /// Buffers that held track audio
    pub audio_buffers: u64,
    /// Sample frames pulled
    pub frames: u64,
    /// End-of-track sentinels seen
    pub tracks_ended: u64,
}

#[derive(Debug, Default)]
struct NullCounters {
    buffers: AtomicU64,
    audio_buffers: AtomicU64,
    frames: AtomicU64,
    tracks_ended: AtomicU64,
}

/// Sink without a device
///
/// A thread pulls one period at a time, paced to real time, and discards
/// the audio. Optionally keeps a copy of what it pulled.
pub struct NullSink {
    spec: StreamSpec,
    period_frames: usize,
    counters: Arc<NullCounters>,
    capture: Option<Arc<Mutex<Vec<f32>>>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl NullSink {
    pub fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            period_frames: 512,
            counters: Arc::new(NullCounters::default()),
            capture: None,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Sample frames requested per pull
    pub fn with_period(mut self, frames: usize) -> Self {
        self.period_frames = frames.max(1);
        self
    }

    /// Keep every buffer that carried audio in `buffer`
    pub fn with_capture(mut self, buffer: Arc<Mutex<Vec<f32>>>) -> Self {
        self.capture = Some(buffer);
        self
    }

    /// Shared view of the counters, usable after the sink moved away
    pub fn stats_handle(&self) -> NullSinkStatsHandle {
        NullSinkStatsHandle {
            counters: self.counters.clone(),
        }
    }

    pub fn stats(&self) -> NullSinkStats {
        self.stats_handle().get()
    }

    fn run(
        mut feed: SinkFeed,
        period_frames: usize,
        counters: Arc<NullCounters>,
        capture: Option<Arc<Mutex<Vec<f32>>>>,
        running: Arc<AtomicBool>,
    ) {
        let spec = feed.spec();
        let mut buffer = vec![0.0f32; period_frames * usize::from(spec.channels)];
        let period = spec.frames_to_duration(period_frames as u64);
        let mut next = Instant::now();

        while running.load(Ordering::Acquire) {
            let status = feed.fill(&mut buffer);

            counters.buffers.fetch_add(1, Ordering::Relaxed);
            counters
                .frames
                .fetch_add(period_frames as u64, Ordering::Relaxed);
            match status {
                FillStatus::Audio => {
                    counters.audio_buffers.fetch_add(1, Ordering::Relaxed);
                }
                FillStatus::EndOfTrack => {
                    counters.audio_buffers.fetch_add(1, Ordering::Relaxed);
                    counters.tracks_ended.fetch_add(1, Ordering::Relaxed);
                }
                FillStatus::Silence => {}
            }
            if status != FillStatus::Silence {
                if let Some(capture) = &capture {
                    capture.lock().extend_from_slice(&buffer);
                }
            }

            next += period;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else if now - next > period * 8 {
                // Fell far behind; do not try to catch up in a burst
                next = now;
            }
        }
    }
}

impl AudioSink for NullSink {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn start(&mut self, feed: SinkFeed) -> Result<()> {
        self.stop();
        if feed.spec() != self.spec {
            return Err(PlaybackError::DeviceUnavailable(format!(
                "feed produces {:?}, sink expects {:?}",
                feed.spec(),
                self.spec
            )));
        }

        self.running.store(true, Ordering::Release);
        let period_frames = self.period_frames;
        let counters = self.counters.clone();
        let capture = self.capture.clone();
        let running = self.running.clone();

        let thread = thread::Builder::new()
            .name("retro-null-sink".into())
            .spawn(move || Self::run(feed, period_frames, counters, capture, running))
            .map_err(|e| PlaybackError::DeviceUnavailable(e.to_string()))?;
        self.thread = Some(thread);

        tracing::debug!(
            "Null sink started: {} Hz, {} ch, {} frames per pull",
            self.spec.sample_rate,
            self.spec.channels,
            self.period_frames
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Null sink thread panicked");
            }
        }
    }

    fn name(&self) -> String {
        "null".to_string()
    }
}

impl Drop for NullSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read-only handle to a [`NullSink`]'s counters
#[derive(Debug, Clone)]
pub struct NullSinkStatsHandle {
    counters: Arc<NullCounters>,
}

impl NullSinkStatsHandle {
    pub fn get(&self) -> NullSinkStats {
        NullSinkStats {
            buffers: self.counters.buffers.load(Ordering::Relaxed),
            audio_buffers: self.counters.audio_buffers.load(Ordering::Relaxed),
            frames: self.counters.frames.load(Ordering::Relaxed),
            tracks_ended: self.counters.tracks_ended.load(Ordering::Relaxed),
        }
    }
}
