//! Retro Player - Playback Pipeline
//!
//! Moves decoded audio from disk to the output device while keeping the
//! equalizer, visualizer and position display in step with what is
//! audible.
//!
//! This crate provides:
//! - Bounded, epoch-stamped frame queue between decoder and device
//! - Playback clock driven by frames the device consumed
//! - Transport state machine (play, pause, seek, stop, next, previous)
//! - Pull-based output sink interface with a deadline contract
//! - Visualizer loop publishing spectrum snapshots at a fixed cadence
//! - Playlist with shuffle and repeat, logarithmic volume
//!
//! # Threads
//!
//! - one decode worker per playing track, blocking freely on file I/O
//! - the sink's real-time context, which only waits on the frame queue
//!   with a timeout shorter than its buffer
//! - the visualization loop
//! - the transport worker, which serializes every command
//!
//! # Example
//!
//! ```rust,no_run
//! use retro_playback::{NullSink, Player, PlayerConfig};
//! use retro_audio::{EqualizerState, StreamSpec};
//! use std::time::Duration;
//!
//! let sink = NullSink::new(StreamSpec::cd());
//! let player = Player::new(PlayerConfig::default(), Box::new(sink))?;
//!
//! player.load("/music/side-a.flac")?;
//! player.set_equalizer(EqualizerState::new(4.0, 0.0, 2.0));
//! player.play()?;
//! player.seek(Duration::from_secs(30))?;
//!
//! let status = player.status();
//! println!("{:?} at {:?}", status.state, status.position);
//! if let Some(snapshot) = player.spectrum() {
//!     println!("{} bars", snapshot.bars.len());
//! }
//! # Ok::<(), retro_playback::PlaybackError>(())
//! ```

mod clock;
pub mod config;
mod error;
mod events;
mod feed;
mod player;
mod playlist;
mod queue;
mod session;
mod sink;
mod transport;
pub mod types;
mod visualizer;
pub mod volume;

pub use clock::PlaybackClock;
pub use config::{PlaybackSettings, PlayerConfig, MAX_CROSSFADE_MS};
pub use error::{PlaybackError, Result};
pub use events::FaultReporter;
pub use feed::{FillStatus, SinkFeed};
pub use player::Player;
pub use playlist::Playlist;
pub use queue::{FrameQueue, PushError, QueueItem};
pub use sink::{AudioSink, NullSink, NullSinkStats, NullSinkStatsHandle};
pub use types::{PlaybackState, PlayerStatus, RepeatMode};
pub use volume::VolumeControl;
