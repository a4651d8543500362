//! Retro Player Audio
//!
//! Signal-level building blocks for Retro Player's playback pipeline.
//!
//! This crate provides:
//! - A decoder adapter over Symphonia producing fixed-size PCM frames
//!   (MP3, FLAC, OGG/Vorbis, WAV, AAC/M4A, AIFF)
//! - A three-band equalizer (bass shelf, mid peak, treble shelf) with
//!   tear-free gain updates from another thread
//! - A spectrum analyzer for visualizer bars, fed through a lock-free tap
//!
//! Threads, queues and the transport live in `retro-playback`.
//!
//! # Example: Decoding Frames
//!
//! ```rust,no_run
//! use retro_audio::{open_decoder, StreamSpec, Track, DEFAULT_FRAME_LEN};
//!
//! # fn example() -> retro_audio::Result<()> {
//! let track = Track::probe("/music/song.flac")?;
//! let mut decoder = open_decoder(&track, StreamSpec::cd(), DEFAULT_FRAME_LEN)?;
//!
//! while let Some(frame) = decoder.next_frame()? {
//!     println!("frame {} at {:?}", frame.index(), frame.timestamp());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Equalizing and Analyzing
//!
//! ```rust
//! use retro_audio::{
//!     Equalizer, EqualizerControl, EqualizerState, SpectrumAnalyzer, SpectrumConfig, StreamSpec,
//! };
//! use std::time::Duration;
//!
//! let control = EqualizerControl::new(EqualizerState::new(6.0, 0.0, -3.0));
//! let mut eq = Equalizer::new(control.clone(), 44_100, 2);
//!
//! let mut buffer = vec![0.25; 2048];
//! eq.process_frame(&mut buffer);
//!
//! let mut analyzer = SpectrumAnalyzer::new(SpectrumConfig::default(), StreamSpec::cd()).unwrap();
//! analyzer.push_interleaved(&buffer, 2);
//! let snapshot = analyzer.analyze(Duration::ZERO);
//! assert_eq!(snapshot.bars.len(), 24);
//! ```

mod decoder;
pub mod equalizer;
mod error;
mod frame;
mod resample;
pub mod spectrum;
mod track;

pub use decoder::{open_decoder, FrameDecoder, SymphoniaDecoder};
pub use equalizer::{Equalizer, EqualizerControl, EqualizerState};
pub use error::{AudioError, Result};
pub use frame::{AudioFrame, StreamSpec, DEFAULT_FRAME_LEN};
pub use resample::StreamResampler;
pub use spectrum::{
    spectrum_tap, SpectrumAnalyzer, SpectrumConfig, SpectrumSnapshot, SpectrumTap,
    SpectrumTapReader,
};
pub use track::{AudioFormat, Track};
