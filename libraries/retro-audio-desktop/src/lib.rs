//! Desktop audio output for Retro Player using cpal
//!
//! This crate provides `CpalSink`, the system-device implementation of the
//! `AudioSink` trait from `retro-playback`.
//!
//! # Features
//!
//! - Cross-platform output through cpal (ALSA, CoreAudio, WASAPI; JACK and
//!   ASIO behind features)
//! - Stream opened at the device's native rate and channel count; tracks are
//!   resampled upstream to match
//! - Device faults reported back to the transport, which restarts the stream
//!   once
//!
//! # Example
//!
//! ```no_run
//! use retro_audio_desktop::CpalSink;
//! use retro_playback::{Player, PlayerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = CpalSink::new()?;
//! let player = Player::new(PlayerConfig::default(), Box::new(sink))?;
//! player.load("/music/track.flac")?;
//! player.play()?;
//! # Ok(())
//! # }
//! ```

mod device;
mod error;
mod output;

pub use device::{default_device, find_device, list_devices, OutputDeviceInfo};
pub use error::{AudioOutputError, Result};
pub use output::CpalSink;
