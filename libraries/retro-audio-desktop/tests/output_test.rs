//! System output tests
//!
//! These need a real output device. On headless machines `CpalSink::new`
//! fails and every test returns early.

use retro_audio_desktop::CpalSink;
use retro_playback::{AudioSink, PlaybackState, Player, PlayerConfig};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

// ===== Test Helpers =====

fn write_tone(dir: &Path, seconds: f32) -> PathBuf {
    let path = dir.join("tone.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 22_050,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..(seconds * 22_050.0) as usize {
        let t = i as f32 / 22_050.0;
        let value = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.05;
        writer.write_sample((value * 32767.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn quiet_config() -> PlayerConfig {
    let mut config = PlayerConfig::default();
    config.playback.volume = 5;
    config
}

// ===== Tests =====

#[test]
fn plays_a_short_file_to_the_end() {
    let Ok(sink) = CpalSink::new() else {
        return;
    };
    let dir = TempDir::new().unwrap();
    let path = write_tone(dir.path(), 0.3);

    let player = Player::new(quiet_config(), Box::new(sink)).unwrap();
    player.load(&path).unwrap();
    player.play().unwrap();

    let mut state = player.status().state;
    for _ in 0..200 {
        state = player.status().state;
        if state == PlaybackState::Stopped {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(state, PlaybackState::Stopped);
    player.shutdown();
}

#[test]
fn device_spec_drives_the_decode_format() {
    let Ok(sink) = CpalSink::new() else {
        return;
    };
    let spec = sink.spec();
    let dir = TempDir::new().unwrap();
    let path = write_tone(dir.path(), 1.0);

    let player = Player::new(quiet_config(), Box::new(sink)).unwrap();
    player.load(&path).unwrap();
    player.play().unwrap();
    thread::sleep(Duration::from_millis(300));

    // Mono 22.05 kHz in, device format out; position still in track time
    let position = player.position();
    assert!(position > Duration::from_millis(100), "{:?} at {:?}", position, spec);
    assert!(position < Duration::from_millis(900));
}
