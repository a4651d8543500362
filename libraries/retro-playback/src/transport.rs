//! Transport state machine
//!
//! ```text
//! Stopped --load--> Paused --play--> Playing --pause--> Paused
//! Playing/Paused --seek--> Seeking --(decoder repositioned)--> prior state
//! any --stop--> Stopped
//! ```
//!
//! The transport lives on one worker thread and is the only place playback
//! position is moved. It owns the output sink, the playlist and the decode
//! session of the current track, and reacts to pipeline events.
//!
//! With crossfade enabled, a track change while playing hands the old
//! session to the feed to fade out instead of closing it. It is closed once
//! the feed reports the fade finished.

use crate::clock::PlaybackClock;
use crate::config::{PlaybackSettings, PlayerConfig};
use crate::error::{PlaybackError, Result};
use crate::events::PipelineEvent;
use crate::feed::{FeedParts, FeedShared, FeedSource, FeedSwitch, SinkFeed};
use crate::playlist::Playlist;
use crate::queue::FrameQueue;
use crate::session::DecodeSession;
use crate::sink::AudioSink;
use crate::types::{PlaybackState, PlayerStatus, RepeatMode};
use crate::visualizer::{SpectrumSlot, TapHandoff, Visualizer};
use crate::volume::VolumeControl;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use retro_audio::{open_decoder, spectrum_tap, EqualizerControl, StreamSpec, Track};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Attempts to start the output device before giving up
const SINK_START_ATTEMPTS: usize = 2;

/// Reply channel for a synchronous command
pub(crate) type Reply<T> = Sender<Result<T>>;

/// Requests from the [`Player`](crate::Player) handle
pub(crate) enum Command {
    Load { path: PathBuf, reply: Reply<Track> },
    Enqueue { paths: Vec<PathBuf>, reply: Reply<usize> },
    Select { index: usize, reply: Reply<()> },
    Remove { index: usize, reply: Reply<Track> },
    ClearPlaylist { reply: Reply<()> },
    Playlist { reply: Reply<Vec<Track>> },
    Play { reply: Reply<()> },
    Pause { reply: Reply<()> },
    Seek { position: Duration, reply: Reply<()> },
    Stop { reply: Reply<()> },
    Next { reply: Reply<()> },
    Previous { reply: Reply<()> },
    SetRepeat { mode: RepeatMode, reply: Reply<()> },
    SetShuffle { enabled: bool, reply: Reply<()> },
    Shutdown,
}

/// Shared handles the transport is built from
pub(crate) struct TransportParts {
    pub config: PlayerConfig,
    pub sink: Box<dyn AudioSink>,
    pub clock: PlaybackClock,
    pub shared: Arc<FeedShared>,
    pub equalizer: EqualizerControl,
    pub volume: VolumeControl,
    pub events: Sender<PipelineEvent>,
    pub status: Arc<Mutex<PlayerStatus>>,
}

pub(crate) struct Transport {
    settings: PlaybackSettings,
    spec: StreamSpec,
    sink: Box<dyn AudioSink>,
    feed_parts: FeedParts,
    switches: Sender<FeedSwitch>,
    tap_frames: usize,
    visualizer: Visualizer,
    clock: PlaybackClock,
    shared: Arc<FeedShared>,
    equalizer: EqualizerControl,
    volume: VolumeControl,
    events: Sender<PipelineEvent>,
    status: Arc<Mutex<PlayerStatus>>,

    playlist: Playlist,
    track: Option<Track>,
    session: Option<DecodeSession>,
    /// Session fading out under the current one
    retired: Option<DecodeSession>,
    next_session: u64,

    state: PlaybackState,
    /// State to return to when the pending seek completes
    resume: PlaybackState,
    epoch: u64,
    pending_seek: Option<u64>,
    /// Where to start decoding when the session is opened
    start_offset: Duration,

    message: Option<String>,
    device_restarted: bool,
    device_failed: bool,
}

impl Transport {
    /// Build the transport and start the sink.
    ///
    /// # Errors
    /// `DeviceUnavailable` if the sink fails to start twice in a row.
    pub fn new(parts: TransportParts) -> Result<Self> {
        let TransportParts {
            config,
            sink,
            clock,
            shared,
            equalizer,
            volume,
            events,
            status,
        } = parts;

        let spec = sink.spec();
        clock.set_sample_rate(spec.sample_rate);

        let (switches, switches_rx) = unbounded();
        let feed_parts = FeedParts {
            switches: switches_rx,
            shared: shared.clone(),
            clock: clock.clone(),
            equalizer: equalizer.clone(),
            volume: volume.clone(),
            events: events.clone(),
            frame_len: config.playback.frame_len,
        };

        let tap_frames = config.spectrum.fft_size * 4;
        let visualizer =
            Visualizer::spawn(config.spectrum.clone(), spec, clock.clone(), shared.clone())?;

        let mut playlist = Playlist::new();
        playlist.set_repeat(config.playback.repeat);
        playlist.set_shuffle(config.playback.shuffle);

        let mut transport = Self {
            settings: config.playback,
            spec,
            sink,
            feed_parts,
            switches,
            tap_frames,
            visualizer,
            clock,
            shared,
            equalizer,
            volume,
            events,
            status,
            playlist,
            track: None,
            session: None,
            retired: None,
            next_session: 0,
            state: PlaybackState::Stopped,
            resume: PlaybackState::Paused,
            epoch: 0,
            pending_seek: None,
            start_offset: Duration::ZERO,
            message: None,
            device_restarted: false,
            device_failed: false,
        };

        transport.start_sink(SINK_START_ATTEMPTS)?;
        tracing::info!(
            "Output '{}' running at {} Hz, {} channels",
            transport.sink.name(),
            spec.sample_rate,
            spec.channels
        );
        transport.publish();
        Ok(transport)
    }

    pub fn spectrum_slot(&self) -> SpectrumSlot {
        self.visualizer.slot()
    }

    /// Run one command. Returns `false` on shutdown.
    pub fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Load { path, reply } => {
                let _ = reply.send(self.load_path(path));
            }
            Command::Enqueue { paths, reply } => {
                let _ = reply.send(Ok(self.enqueue(paths)));
            }
            Command::Select { index, reply } => {
                let _ = reply.send(self.select(index));
            }
            Command::Remove { index, reply } => {
                let _ = reply.send(self.remove(index));
            }
            Command::ClearPlaylist { reply } => {
                self.stop();
                self.playlist.clear();
                self.track = None;
                let _ = reply.send(Ok(()));
            }
            Command::Playlist { reply } => {
                let _ = reply.send(Ok(self.playlist.tracks().to_vec()));
            }
            Command::Play { reply } => {
                let _ = reply.send(self.play());
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Seek { position, reply } => {
                let _ = reply.send(self.seek(position));
            }
            Command::Stop { reply } => {
                self.stop();
                let _ = reply.send(Ok(()));
            }
            Command::Next { reply } => {
                let _ = reply.send(self.skip(true));
            }
            Command::Previous { reply } => {
                let _ = reply.send(self.skip(false));
            }
            Command::SetRepeat { mode, reply } => {
                self.playlist.set_repeat(mode);
                let _ = reply.send(Ok(()));
            }
            Command::SetShuffle { enabled, reply } => {
                self.playlist.set_shuffle(enabled);
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown => return false,
        }
        self.publish();
        true
    }

    /// React to something reported by the pipeline
    pub fn on_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::SeekCompleted {
                session,
                epoch,
                position,
            } => {
                if self.is_current(session) && self.pending_seek == Some(epoch) {
                    tracing::debug!("Seek to {:?} completed", position);
                    self.pending_seek = None;
                    self.set_state(self.resume);
                }
            }
            PipelineEvent::DecodeFailed { session, error } => {
                if self.is_current(session) {
                    tracing::warn!("Track truncated: {}", error);
                    self.message = Some(PlaybackError::CorruptStream(error).user_message());
                }
            }
            PipelineEvent::EndOfTrack { session, epoch } => {
                if self.is_current(session) && epoch == self.epoch {
                    self.track_finished();
                }
            }
            PipelineEvent::FadeFinished { session } => {
                if self.retired.as_ref().map(DecodeSession::id) == Some(session) {
                    tracing::debug!("Crossfade from session {} finished", session);
                    self.close_retired();
                }
            }
            PipelineEvent::DeviceFault { error } => self.device_fault(error),
        }
        self.publish();
    }

    /// Stop everything and release the device
    pub fn shutdown(&mut self) {
        self.stop();
        self.sink.stop();
        tracing::info!("Transport shut down");
    }

    // ===== Playlist =====

    fn load_path(&mut self, path: PathBuf) -> Result<Track> {
        let track = Track::probe(&path)?;
        let index = self.playlist.push(track.clone());
        self.load_index(index)?;
        Ok(track)
    }

    fn enqueue(&mut self, paths: Vec<PathBuf>) -> usize {
        let mut added = 0;
        for path in paths {
            match Track::probe(&path) {
                Ok(track) => {
                    self.playlist.push(track);
                    added += 1;
                }
                Err(e) => {
                    tracing::warn!("Not adding {}: {}", path.display(), e);
                    self.message = Some(PlaybackError::from(e).user_message());
                }
            }
        }
        added
    }

    fn select(&mut self, index: usize) -> Result<()> {
        let was_playing = self.is_playing();
        self.change_track(index, was_playing)
    }

    fn remove(&mut self, index: usize) -> Result<Track> {
        if self.playlist.current_index() == Some(index) {
            self.stop();
            self.track = None;
        }
        self.playlist.remove(index)
    }

    fn skip(&mut self, forward: bool) -> Result<()> {
        if self.playlist.is_empty() {
            return Err(PlaybackError::PlaylistEmpty);
        }
        let was_playing = self.is_playing();
        let target = if forward {
            self.playlist.next_entry()
        } else {
            self.playlist.previous_entry()
        };

        match target {
            Some(index) => self.change_track(index, was_playing)?,
            None => {
                tracing::info!("End of playlist");
                self.stop();
            }
        }
        Ok(())
    }

    /// Switch to entry `index` on a user request, crossfading when the
    /// current track is audible and a fade is configured
    fn change_track(&mut self, index: usize, was_playing: bool) -> Result<()> {
        let fade = self.settings.crossfade_ms > 0
            && self.state == PlaybackState::Playing
            && self.session.is_some();

        if !fade {
            self.load_index(index)?;
            if was_playing {
                self.play()?;
            }
            return Ok(());
        }

        let track = self.playlist.select(index)?.clone();
        self.retire_session();
        self.install(track);
        self.open_or_skip()?;
        self.message = None;
        Ok(())
    }

    // ===== Transport =====

    /// Make playlist entry `index` the current track, paused at 0
    fn load_index(&mut self, index: usize) -> Result<()> {
        let track = self.playlist.select(index)?.clone();
        self.close_session();
        self.install(track);
        self.set_state(PlaybackState::Paused);
        Ok(())
    }

    /// Make `track` current at position 0 without touching the state
    fn install(&mut self, track: Track) {
        tracing::info!("Loaded '{}' ({})", track.title, track.format);
        self.track = Some(track);
        self.rebase(Duration::ZERO);
        self.start_offset = Duration::ZERO;
        self.pending_seek = None;
    }

    fn play(&mut self) -> Result<()> {
        if self.device_failed {
            return Err(PlaybackError::DeviceUnavailable(
                "output device failed earlier in this session".into(),
            ));
        }

        match self.state {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Seeking => {
                self.resume = PlaybackState::Playing;
                return Ok(());
            }
            PlaybackState::Paused | PlaybackState::Stopped => {}
        }

        if self.track.is_none() {
            if self.playlist.is_empty() {
                return Err(PlaybackError::NoTrackLoaded);
            }
            let index = self.playlist.current_index().unwrap_or(0);
            self.load_index(index)?;
        }

        if self.session.is_none() {
            self.open_or_skip()?;
        }

        self.message = None;
        self.set_state(PlaybackState::Playing);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Playing => self.set_state(PlaybackState::Paused),
            PlaybackState::Seeking => self.resume = PlaybackState::Paused,
            PlaybackState::Paused => {}
            PlaybackState::Stopped => {
                return Err(PlaybackError::InvalidOperation(
                    "Nothing is playing".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        let track = self.track.as_ref().ok_or(PlaybackError::NoTrackLoaded)?;
        if self.state == PlaybackState::Stopped {
            return Err(PlaybackError::InvalidOperation(
                "Cannot seek while stopped".to_string(),
            ));
        }
        let position = match track.duration {
            Some(duration) => position.min(duration),
            None => position,
        };

        self.rebase(position);

        match &self.session {
            Some(session) => {
                session.queue().flush(self.epoch);
                session.seek(self.epoch, position);
                if self.state != PlaybackState::Seeking {
                    self.resume = self.state;
                }
                self.pending_seek = Some(self.epoch);
                self.set_state(PlaybackState::Seeking);
            }
            None => {
                // Decoder opens on play; start there
                self.start_offset = position;
            }
        }

        tracing::debug!("Seeking to {:?} (epoch {})", position, self.epoch);
        Ok(())
    }

    fn stop(&mut self) {
        self.set_state(PlaybackState::Stopped);
        self.close_session();
        self.rebase(Duration::ZERO);
        self.start_offset = Duration::ZERO;
        self.pending_seek = None;
    }

    fn track_finished(&mut self) {
        if let Some(track) = &self.track {
            tracing::info!("Finished '{}'", track.title);
        }

        match self.playlist.advance_after_end() {
            Some(index) => {
                if let Err(e) = self.load_index(index).and_then(|_| self.play()) {
                    tracing::warn!("Could not continue playlist: {}", e);
                    self.message = Some(e.user_message());
                }
            }
            None => {
                tracing::info!("End of playlist");
                self.stop();
            }
        }
    }

    /// Open the current track; on a per-track failure move on through the
    /// playlist, giving up after one full pass
    fn open_or_skip(&mut self) -> Result<()> {
        let attempts = self.playlist.len().max(1);
        let mut last_error = PlaybackError::NoTrackLoaded;

        for _ in 0..attempts {
            match self.open_session() {
                Ok(()) => return Ok(()),
                Err(e) if e.is_per_track() => {
                    if let Some(track) = &self.track {
                        tracing::warn!("Skipping '{}': {}", track.title, e);
                    }
                    self.message = Some(e.user_message());
                    last_error = e;

                    match self.playlist.next_entry() {
                        Some(index) => self.load_index(index)?,
                        None => break,
                    }
                }
                Err(e) => return Err(e),
            }
        }

        self.stop();
        self.message = Some(last_error.user_message());
        Err(last_error)
    }

    fn open_session(&mut self) -> Result<()> {
        let track = self.track.as_mut().ok_or(PlaybackError::NoTrackLoaded)?;
        let mut decoder = open_decoder(track, self.spec, self.settings.frame_len)?;
        if track.duration.is_none() {
            track.duration = decoder.duration();
        }
        // Position before the worker exists so nothing ahead of the offset
        // reaches the queue
        if !self.start_offset.is_zero() {
            decoder.seek(self.start_offset)?;
        }

        let queue = FrameQueue::new(
            self.settings.queue_frames(self.spec.sample_rate),
            self.epoch,
        );
        self.next_session += 1;
        let id = self.next_session;
        let session = DecodeSession::spawn(id, decoder, queue.clone(), self.events.clone())
            .map_err(|e| PlaybackError::Audio(format!("cannot start decoder thread: {}", e)))?;

        let _ = self
            .switches
            .send(FeedSwitch::Attach(FeedSource { session: id, queue }));
        self.session = Some(session);
        Ok(())
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = self.switches.send(FeedSwitch::Detach);
            session.close();
        }
        self.close_retired();
    }

    /// Hand the current session to the feed to fade out
    fn retire_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.close_retired();

        let frames = self
            .spec
            .duration_to_frames(Duration::from_millis(self.settings.crossfade_ms));
        let _ = self.switches.send(FeedSwitch::FadeOut {
            frames: usize::try_from(frames).unwrap_or(usize::MAX),
        });
        tracing::debug!("Fading out session {} over {} frames", session.id(), frames);
        self.retired = Some(session);
    }

    fn close_retired(&mut self) {
        if let Some(session) = self.retired.take() {
            session.close();
        }
    }

    /// New epoch, clock jumps to `position`
    fn rebase(&mut self, position: Duration) {
        self.epoch += 1;
        self.clock
            .rebase(self.epoch, self.spec.duration_to_frames(position));
    }

    fn set_state(&mut self, state: PlaybackState) {
        self.state = state;
        self.shared.set_state(state);
    }

    fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
            || (self.state == PlaybackState::Seeking && self.resume == PlaybackState::Playing)
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.as_ref().map(DecodeSession::id) == Some(session)
    }

    // ===== Output device =====

    fn build_feed(&mut self) -> SinkFeed {
        // A new feed starts without the fade
        self.close_retired();
        let (tap, reader) = spectrum_tap(self.spec.channels, self.tap_frames);
        self.visualizer.attach(TapHandoff {
            reader,
            spec: self.spec,
        });
        if let Some(session) = &self.session {
            let _ = self.switches.send(FeedSwitch::Attach(FeedSource {
                session: session.id(),
                queue: session.queue().clone(),
            }));
        }
        SinkFeed::new(self.feed_parts.clone(), self.spec, tap)
    }

    fn start_sink(&mut self, attempts: usize) -> Result<()> {
        let mut last_error = None;
        for attempt in 1..=attempts {
            let feed = self.build_feed();
            match self.sink.start(feed) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "Starting output '{}' failed (attempt {}): {}",
                        self.sink.name(),
                        attempt,
                        e
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(PlaybackError::DeviceUnavailable(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    fn device_fault(&mut self, error: String) {
        if self.device_failed {
            return;
        }
        tracing::warn!("Output device fault: {}", error);

        if !self.device_restarted {
            self.device_restarted = true;
            self.sink.stop();
            if self.start_sink(1).is_ok() {
                tracing::info!("Output device restarted");
                return;
            }
        }

        tracing::error!("Output device unavailable, stopping playback");
        self.device_failed = true;
        self.stop();
        self.sink.stop();
        self.message = Some(PlaybackError::DeviceUnavailable(error).user_message());
    }

    // ===== Status =====

    fn publish(&self) {
        let status = PlayerStatus {
            state: self.state,
            position: self.clock.position(),
            duration: self.track.as_ref().and_then(|t| t.duration),
            track: self.track.clone(),
            playlist_index: self.playlist.current_index(),
            playlist_len: self.playlist.len(),
            volume: self.volume.level(),
            muted: self.volume.is_muted(),
            equalizer: self.equalizer.get(),
            repeat: self.playlist.repeat(),
            shuffle: self.playlist.is_shuffled(),
            underruns: self.shared.underruns(),
            message: self.message.clone(),
        };
        *self.status.lock() = status;
    }
}
