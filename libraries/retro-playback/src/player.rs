//! Public player handle
//!
//! [`Player`] forwards transport commands to the transport worker thread and
//! waits for the answer, so every command is applied in order, one at a
//! time. Queries (`status`, `spectrum`, `position`) never touch the worker
//! and never block on it.

use crate::clock::PlaybackClock;
use crate::config::PlayerConfig;
use crate::error::{PlaybackError, Result};
use crate::events::{PipelineEvent, EVENT_CAPACITY};
use crate::feed::FeedShared;
use crate::sink::AudioSink;
use crate::transport::{Command, Reply, Transport, TransportParts};
use crate::types::{PlaybackState, PlayerStatus, RepeatMode};
use crate::visualizer::SpectrumSlot;
use crate::volume::VolumeControl;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use retro_audio::{EqualizerControl, EqualizerState, SpectrumSnapshot, Track};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to a running audio pipeline
pub struct Player {
    commands: Sender<Command>,
    status: Arc<Mutex<PlayerStatus>>,
    spectrum: SpectrumSlot,
    clock: PlaybackClock,
    shared: Arc<FeedShared>,
    equalizer: EqualizerControl,
    volume: VolumeControl,
    worker: Option<JoinHandle<()>>,
}

impl Player {
    /// Start the pipeline on `sink`.
    ///
    /// The sink's spec decides the sample rate and channel layout every
    /// track is decoded to.
    ///
    /// # Errors
    /// `Config` for invalid settings, `DeviceUnavailable` if the sink
    /// cannot be started after one retry.
    pub fn new(config: PlayerConfig, sink: Box<dyn AudioSink>) -> Result<Self> {
        config.validate()?;

        let clock = PlaybackClock::new(sink.spec().sample_rate);
        let shared = Arc::new(FeedShared::new());
        let equalizer = EqualizerControl::new(config.equalizer);
        let volume = VolumeControl::new(config.playback.volume);
        let (events_tx, events_rx) = bounded(EVENT_CAPACITY);
        let (commands, commands_rx) = unbounded();

        let status = Arc::new(Mutex::new(PlayerStatus {
            state: PlaybackState::Stopped,
            position: Duration::ZERO,
            duration: None,
            track: None,
            playlist_index: None,
            playlist_len: 0,
            volume: volume.level(),
            muted: false,
            equalizer: equalizer.get(),
            repeat: config.playback.repeat,
            shuffle: config.playback.shuffle,
            underruns: 0,
            message: None,
        }));

        let transport = Transport::new(TransportParts {
            config,
            sink,
            clock: clock.clone(),
            shared: shared.clone(),
            equalizer: equalizer.clone(),
            volume: volume.clone(),
            events: events_tx,
            status: status.clone(),
        })?;
        let spectrum = transport.spectrum_slot();

        let worker = thread::Builder::new()
            .name("retro-transport".into())
            .spawn(move || run_transport(transport, commands_rx, events_rx))
            .map_err(|e| PlaybackError::Audio(format!("cannot start transport: {}", e)))?;

        Ok(Self {
            commands,
            status,
            spectrum,
            clock,
            shared,
            equalizer,
            volume,
            worker: Some(worker),
        })
    }

    // ===== Playlist =====

    /// Add a file to the playlist and make it the current track (paused)
    pub fn load(&self, path: impl Into<PathBuf>) -> Result<Track> {
        let path = path.into();
        self.call(|reply| Command::Load { path, reply })
    }

    /// Append files to the playlist. Files that cannot be probed are
    /// skipped; returns how many were added.
    pub fn enqueue<I, P>(&self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths = paths.into_iter().map(Into::into).collect();
        self.call(|reply| Command::Enqueue { paths, reply })
    }

    /// Jump to playlist entry `index`, keeping play/pause
    pub fn select(&self, index: usize) -> Result<()> {
        self.call(|reply| Command::Select { index, reply })
    }

    pub fn remove(&self, index: usize) -> Result<Track> {
        self.call(|reply| Command::Remove { index, reply })
    }

    pub fn clear_playlist(&self) -> Result<()> {
        self.call(|reply| Command::ClearPlaylist { reply })
    }

    pub fn playlist(&self) -> Result<Vec<Track>> {
        self.call(|reply| Command::Playlist { reply })
    }

    pub fn set_repeat(&self, mode: RepeatMode) -> Result<()> {
        self.call(|reply| Command::SetRepeat { mode, reply })
    }

    pub fn set_shuffle(&self, enabled: bool) -> Result<()> {
        self.call(|reply| Command::SetShuffle { enabled, reply })
    }

    // ===== Transport =====

    pub fn play(&self) -> Result<()> {
        self.call(|reply| Command::Play { reply })
    }

    pub fn pause(&self) -> Result<()> {
        self.call(|reply| Command::Pause { reply })
    }

    /// Pause if playing, otherwise play
    pub fn toggle(&self) -> Result<()> {
        match self.shared.state() {
            PlaybackState::Playing => self.pause(),
            _ => self.play(),
        }
    }

    /// Move to `position` within the current track. Returns as soon as the
    /// seek is under way; `status().state` is `Seeking` until the decoder
    /// has repositioned.
    pub fn seek(&self, position: Duration) -> Result<()> {
        self.call(|reply| Command::Seek { position, reply })
    }

    pub fn stop(&self) -> Result<()> {
        self.call(|reply| Command::Stop { reply })
    }

    pub fn next(&self) -> Result<()> {
        self.call(|reply| Command::Next { reply })
    }

    pub fn previous(&self) -> Result<()> {
        self.call(|reply| Command::Previous { reply })
    }

    // ===== Controls applied directly =====

    /// Publish new equalizer gains; returns what was applied after clamping
    pub fn set_equalizer(&self, state: EqualizerState) -> EqualizerState {
        self.equalizer.set(state)
    }

    pub fn equalizer(&self) -> EqualizerState {
        self.equalizer.get()
    }

    /// Set volume (0-100); returns the clamped level
    pub fn set_volume(&self, level: u8) -> u8 {
        self.volume.set_level(level)
    }

    pub fn set_muted(&self, muted: bool) {
        self.volume.set_muted(muted);
    }

    // ===== Queries =====

    /// Current state, with live position and counters
    pub fn status(&self) -> PlayerStatus {
        let mut status = self.status.lock().clone();
        status.state = self.shared.state();
        status.position = self.clock.position();
        status.underruns = self.shared.underruns();
        status.volume = self.volume.level();
        status.muted = self.volume.is_muted();
        status.equalizer = self.equalizer.get();
        status
    }

    /// Audible position in the current track
    pub fn position(&self) -> Duration {
        self.clock.position()
    }

    /// Most recent visualizer snapshot; `None` while stopped
    pub fn spectrum(&self) -> Option<SpectrumSnapshot> {
        self.spectrum.lock().clone()
    }

    /// Stop playback, release the device and join the worker
    pub fn shutdown(mut self) {
        self.shutdown_worker();
    }

    fn shutdown_worker(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Transport worker panicked");
            }
        }
    }

    fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = bounded(1);
        self.commands
            .send(make(reply))
            .map_err(|_| PlaybackError::Disconnected)?;
        response.recv().map_err(|_| PlaybackError::Disconnected)?
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

fn run_transport(
    mut transport: Transport,
    commands: Receiver<Command>,
    events: Receiver<PipelineEvent>,
) {
    tracing::debug!("Transport worker started");
    loop {
        select! {
            recv(commands) -> command => match command {
                Ok(command) => {
                    if !transport.handle(command) {
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(events) -> event => {
                if let Ok(event) = event {
                    transport.on_event(event);
                }
            }
        }
    }
    transport.shutdown();
}
