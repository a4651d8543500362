//! Visualization loop
//!
//! Runs on its own low-priority thread at the configured refresh rate.
//! Each tick drains the spectrum tap into the analyzer and publishes the
//! newest snapshot into a slot the UI polls. Nothing here can hold up the
//! audio path: the tap drops samples instead of waiting.

use crate::clock::PlaybackClock;
use crate::feed::FeedShared;
use crate::types::PlaybackState;
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use retro_audio::{
    SpectrumAnalyzer, SpectrumConfig, SpectrumSnapshot, SpectrumTapReader, StreamSpec,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Latest published snapshot
pub(crate) type SpectrumSlot = Arc<Mutex<Option<SpectrumSnapshot>>>;

/// Tap reader for a newly started sink
pub(crate) struct TapHandoff {
    pub reader: SpectrumTapReader,
    pub spec: StreamSpec,
}

pub(crate) struct Visualizer {
    readers: Sender<TapHandoff>,
    shutdown: Sender<()>,
    slot: SpectrumSlot,
    handle: Option<JoinHandle<()>>,
}

impl Visualizer {
    pub fn spawn(
        config: SpectrumConfig,
        spec: StreamSpec,
        clock: PlaybackClock,
        shared: Arc<FeedShared>,
    ) -> crate::Result<Self> {
        let analyzer = SpectrumAnalyzer::new(config, spec)?;
        let slot: SpectrumSlot = Arc::new(Mutex::new(None));
        let (readers, readers_rx) = unbounded();
        let (shutdown, shutdown_rx) = unbounded();

        let worker = VisualizerLoop {
            analyzer,
            reader: None,
            readers: readers_rx,
            clock,
            shared,
            slot: slot.clone(),
            last_epoch: None,
        };
        let handle = thread::Builder::new()
            .name("retro-visualizer".into())
            .spawn(move || worker.run(shutdown_rx))
            .map_err(|e| crate::PlaybackError::Audio(e.to_string()))?;

        Ok(Self {
            readers,
            shutdown,
            slot,
            handle: Some(handle),
        })
    }

    pub fn slot(&self) -> SpectrumSlot {
        self.slot.clone()
    }

    /// Start reading from a new tap (after the sink was (re)started)
    pub fn attach(&self, handoff: TapHandoff) {
        let _ = self.readers.send(handoff);
    }
}

impl Drop for Visualizer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct VisualizerLoop {
    analyzer: SpectrumAnalyzer,
    reader: Option<SpectrumTapReader>,
    readers: Receiver<TapHandoff>,
    clock: PlaybackClock,
    shared: Arc<FeedShared>,
    slot: SpectrumSlot,
    last_epoch: Option<u64>,
}

impl VisualizerLoop {
    fn run(mut self, shutdown: Receiver<()>) {
        let ticker = tick(self.analyzer.config().refresh_interval());
        loop {
            select! {
                recv(ticker) -> _ => self.tick(),
                recv(shutdown) -> _ => break,
            }
        }
    }

    fn tick(&mut self) {
        while let Ok(handoff) = self.readers.try_recv() {
            self.analyzer.set_sample_rate(handoff.spec.sample_rate);
            self.analyzer.clear();
            self.reader = Some(handoff.reader);
        }
        let Some(reader) = self.reader.as_mut() else {
            return;
        };

        match self.shared.state() {
            PlaybackState::Playing => {
                // Audio from before a seek or track change must not be
                // analyzed under the new position
                let epoch = self.clock.epoch();
                if self.last_epoch != Some(epoch) {
                    reader.clear();
                    self.analyzer.clear();
                    self.last_epoch = Some(epoch);
                }
                reader.drain_into(&mut self.analyzer);
                let snapshot = self.analyzer.analyze(self.clock.position());
                *self.slot.lock() = Some(snapshot);
            }
            PlaybackState::Stopped => {
                reader.clear();
                self.analyzer.clear();
                self.last_epoch = None;
                *self.slot.lock() = None;
            }
            PlaybackState::Paused | PlaybackState::Seeking => {}
        }
    }
}
