//! Pull side of the pipeline
//!
//! A [`SinkFeed`] is moved into the output sink's real-time context. Each
//! device request calls [`SinkFeed::fill`], which pops frames from the
//! current track's queue, runs the equalizer, feeds the spectrum tap,
//! applies volume and advances the playback clock. It waits on the queue
//! only up to half the buffer's duration and writes silence when nothing
//! arrived in time.
//!
//! On a track change with crossfade enabled the previous track keeps
//! playing from its own queue, faded out with an equal-power curve while
//! the next one fades in.

use crate::clock::PlaybackClock;
use crate::events::{FaultReporter, PipelineEvent};
use crate::queue::{FrameQueue, QueueItem};
use crate::types::PlaybackState;
use crate::volume::{VolumeControl, VolumeRamp};
use crossbeam_channel::{Receiver, Sender};
use retro_audio::{AudioFrame, Equalizer, EqualizerControl, SpectrumTap, StreamSpec};
use std::f32::consts::FRAC_PI_2;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lower bound for the time `fill` may wait on an empty queue
const MIN_WAIT: Duration = Duration::from_micros(500);

/// What a call to [`SinkFeed::fill`] produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// At least part of the buffer is track audio
    Audio,
    /// The whole buffer is silence (paused, stopped, seeking or starved)
    Silence,
    /// The track's end-of-stream sentinel was reached in this buffer
    EndOfTrack,
}

/// State shared between the transport and the pull context
#[derive(Debug)]
pub(crate) struct FeedShared {
    state: AtomicU8,
    underruns: AtomicU64,
}

impl FeedShared {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(encode_state(PlaybackState::Stopped)),
            underruns: AtomicU64::new(0),
        }
    }

    pub fn set_state(&self, state: PlaybackState) {
        self.state.store(encode_state(state), Ordering::Release);
    }

    pub fn state(&self) -> PlaybackState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl Default for FeedShared {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_state(state: PlaybackState) -> u8 {
    match state {
        PlaybackState::Stopped => 0,
        PlaybackState::Playing => 1,
        PlaybackState::Paused => 2,
        PlaybackState::Seeking => 3,
    }
}

fn decode_state(value: u8) -> PlaybackState {
    match value {
        1 => PlaybackState::Playing,
        2 => PlaybackState::Paused,
        3 => PlaybackState::Seeking,
        _ => PlaybackState::Stopped,
    }
}

/// The queue of the track currently playing
#[derive(Debug, Clone)]
pub(crate) struct FeedSource {
    pub session: u64,
    pub queue: FrameQueue,
}

/// Messages from the transport to the feed; applied at the start of `fill`
#[derive(Debug)]
pub(crate) enum FeedSwitch {
    Attach(FeedSource),
    /// Keep the current track sounding, fading out over `frames` sample
    /// frames under whatever is attached next
    FadeOut {
        frames: usize,
    },
    Detach,
}

/// Everything the feed needs besides the per-sink parts
#[derive(Clone)]
pub(crate) struct FeedParts {
    pub switches: Receiver<FeedSwitch>,
    pub shared: Arc<FeedShared>,
    pub clock: PlaybackClock,
    pub equalizer: EqualizerControl,
    pub volume: VolumeControl,
    pub events: Sender<PipelineEvent>,
    pub frame_len: usize,
}

struct Pending {
    frame: AudioFrame,
    epoch: u64,
    /// Sample frames of `frame` already written
    offset: usize,
}

/// Outgoing track of a crossfade
struct Fade {
    source: FeedSource,
    pending: Option<(AudioFrame, usize)>,
    ended: bool,
    /// Sample frames of the fade already played
    position: usize,
    length: usize,
}

impl Fade {
    /// Copy whatever the outgoing queue has ready without waiting. The rest
    /// of `out` is zeroed. Returns the number of samples copied.
    fn read(&mut self, out: &mut [f32], channels: usize) -> usize {
        let mut written = 0;
        while written < out.len() && !self.ended {
            if self.pending.is_none() {
                match self.source.queue.try_pop() {
                    Some(QueueItem::Frame(frame)) => self.pending = Some((frame, 0)),
                    Some(QueueItem::EndOfStream) => self.ended = true,
                    None => break,
                }
                continue;
            }
            if let Some((frame, offset)) = self.pending.as_mut() {
                let start = *offset * channels;
                let samples = frame.samples();
                let n = (samples.len() - start).min(out.len() - written);
                out[written..written + n].copy_from_slice(&samples[start..start + n]);
                written += n;
                *offset += n / channels;
                if *offset >= frame.frames() {
                    self.pending = None;
                }
            }
        }
        out[written..].fill(0.0);
        written
    }
}

/// Equal-power gains `(outgoing, incoming)` at `t` in [0, 1]
fn crossfade_gains(t: f32) -> (f32, f32) {
    let angle = t.clamp(0.0, 1.0) * FRAC_PI_2;
    (angle.cos(), angle.sin())
}

/// Real-time pull handle given to an [`AudioSink`](crate::AudioSink)
pub struct SinkFeed {
    spec: StreamSpec,
    channels: usize,
    switches: Receiver<FeedSwitch>,
    source: Option<FeedSource>,
    pending: Option<Pending>,
    epoch: u64,
    ended: bool,
    equalizer: Equalizer,
    fade: Option<Fade>,
    /// Filter state of the outgoing track while it fades
    fade_equalizer: Equalizer,
    /// Outgoing samples of the current buffer
    scratch: Vec<f32>,
    volume: VolumeRamp,
    tap: SpectrumTap,
    clock: PlaybackClock,
    shared: Arc<FeedShared>,
    events: Sender<PipelineEvent>,
}

impl SinkFeed {
    pub(crate) fn new(parts: FeedParts, spec: StreamSpec, tap: SpectrumTap) -> Self {
        let channels = usize::from(spec.channels);
        Self {
            spec,
            channels,
            switches: parts.switches,
            source: None,
            pending: None,
            epoch: 0,
            ended: false,
            equalizer: Equalizer::new(parts.equalizer.clone(), spec.sample_rate, spec.channels),
            fade: None,
            fade_equalizer: Equalizer::new(parts.equalizer, spec.sample_rate, spec.channels),
            scratch: vec![0.0; parts.frame_len.max(1) * channels * 2],
            volume: VolumeRamp::new(parts.volume),
            tap,
            clock: parts.clock,
            shared: parts.shared,
            events: parts.events,
        }
    }

    /// Stream layout `fill` writes
    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    /// Handle for reporting device errors back to the transport
    pub fn fault_reporter(&self) -> FaultReporter {
        FaultReporter {
            events: self.events.clone(),
        }
    }

    /// Write the next `out.len()` interleaved samples.
    ///
    /// Never blocks longer than half the buffer's duration. Only whole
    /// sample frames carry audio; a trailing partial frame is silent. Does
    /// not allocate once the first frame has been seen, except to grow the
    /// crossfade buffer for a device buffer larger than any before.
    pub fn fill(&mut self, out: &mut [f32]) -> FillStatus {
        self.apply_switches();

        if self.shared.state() != PlaybackState::Playing {
            out.fill(0.0);
            return FillStatus::Silence;
        }

        let usable = out.len() / self.channels * self.channels;
        out[usable..].fill(0.0);
        let out = &mut out[..usable];

        let (mut status, written) = self.fill_current(out);
        let faded = self.mix_fade(out);
        if faded > 0 && status == FillStatus::Silence {
            status = FillStatus::Audio;
        }

        // Audio from before a rebase must not reach the analyzer after it
        if self.clock.follows(self.epoch) {
            self.tap.push(&out[..written.max(faded)]);
        }
        self.volume.apply(out, self.channels);
        status
    }

    /// Pull the current track into `out`; returns the status and how many
    /// leading samples are track audio
    fn fill_current(&mut self, out: &mut [f32]) -> (FillStatus, usize) {
        let Some(source) = self.source.as_ref() else {
            out.fill(0.0);
            return (FillStatus::Silence, 0);
        };
        let queue = source.queue.clone();
        let session = source.session;

        let current = queue.epoch();
        if current != self.epoch {
            self.start_epoch(current);
        }
        if self.ended {
            out.fill(0.0);
            return (FillStatus::Silence, 0);
        }

        let buffer_frames = out.len() / self.channels;
        let budget = self.spec.frames_to_duration(buffer_frames as u64) / 2;
        let deadline = Instant::now() + budget.max(MIN_WAIT);

        self.equalizer.sync();
        let mut written = 0;
        let mut status = FillStatus::Silence;

        while written < out.len() {
            if self.pending.is_none() {
                let wait = deadline.saturating_duration_since(Instant::now());
                match queue.pop_stamped(wait) {
                    Ok((epoch, QueueItem::Frame(frame))) => self.accept(epoch, frame),
                    Ok((epoch, QueueItem::EndOfStream)) => {
                        self.ended = true;
                        out[written..].fill(0.0);
                        self.report(PipelineEvent::EndOfTrack { session, epoch });
                        status = FillStatus::EndOfTrack;
                        break;
                    }
                    Err(_) => {
                        self.shared.underruns.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            "Frame queue empty, {} samples of silence",
                            out.len() - written
                        );
                        out[written..].fill(0.0);
                        break;
                    }
                }
            }

            if let Some(pending) = self.pending.as_mut() {
                let samples = pending.frame.samples();
                let start = pending.offset * self.channels;
                let n = (samples.len() - start).min(out.len() - written);
                let chunk = &mut out[written..written + n];
                chunk.copy_from_slice(&samples[start..start + n]);
                self.equalizer.process(chunk);
                written += n;
                pending.offset += n / self.channels;
                status = FillStatus::Audio;

                self.clock.advance(
                    pending.epoch,
                    pending.frame.position() + pending.offset as u64,
                );

                if pending.offset >= pending.frame.frames() {
                    self.pending = None;
                }
            }
        }

        (status, written)
    }

    /// Mix the outgoing track of a crossfade over `out`; returns the number
    /// of leading samples the fade covered
    fn mix_fade(&mut self, out: &mut [f32]) -> usize {
        let channels = self.channels;
        let Some(fade) = self.fade.as_mut() else {
            return 0;
        };

        let frames = (out.len() / channels).min(fade.length - fade.position);
        let n = frames * channels;
        if self.scratch.len() < n {
            self.scratch.resize(n, 0.0);
        }
        let scratch = &mut self.scratch[..n];
        let read = fade.read(scratch, channels);
        self.fade_equalizer.sync();
        self.fade_equalizer.process(&mut scratch[..read]);

        let length = fade.length as f32;
        for (i, (mixed, outgoing)) in out[..n]
            .chunks_exact_mut(channels)
            .zip(scratch.chunks_exact(channels))
            .enumerate()
        {
            let (gain_out, gain_in) = crossfade_gains((fade.position + i) as f32 / length);
            for (sample, old) in mixed.iter_mut().zip(outgoing) {
                *sample = (*sample * gain_in + *old * gain_out).clamp(-1.0, 1.0);
            }
        }
        fade.position += frames;

        if fade.position >= fade.length {
            let session = fade.source.session;
            self.fade = None;
            self.report(PipelineEvent::FadeFinished { session });
        }
        n
    }

    fn apply_switches(&mut self) {
        while let Ok(switch) = self.switches.try_recv() {
            match switch {
                FeedSwitch::Attach(source) => {
                    self.reset_current();
                    self.epoch = source.queue.epoch();
                    self.source = Some(source);
                }
                FeedSwitch::FadeOut { frames } => self.begin_fade(frames),
                FeedSwitch::Detach => {
                    self.reset_current();
                    self.source = None;
                    self.fade = None;
                }
            }
        }
    }

    /// Move the current track into the fade slot
    fn begin_fade(&mut self, frames: usize) {
        let source = self.source.take();
        let pending = self.pending.take().map(|p| (p.frame, p.offset));
        let ended = self.ended;
        self.fade = None;

        if let Some(source) = source.filter(|_| frames > 0 && !ended) {
            std::mem::swap(&mut self.equalizer, &mut self.fade_equalizer);
            self.fade = Some(Fade {
                source,
                pending,
                ended: false,
                position: 0,
                length: frames,
            });
        }
        self.reset_current();
    }

    fn reset_current(&mut self) {
        self.pending = None;
        self.ended = false;
        self.equalizer.reset();
    }

    /// Drop everything tied to the previous epoch
    fn start_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
        self.reset_current();
    }

    fn accept(&mut self, epoch: u64, frame: AudioFrame) {
        if epoch != self.epoch {
            self.start_epoch(epoch);
        }
        self.pending = Some(Pending {
            frame,
            epoch,
            offset: 0,
        });
    }

    fn report(&self, event: PipelineEvent) {
        if self.events.try_send(event).is_err() {
            tracing::warn!("Transport not listening, feed event dropped");
        }
    }
}
