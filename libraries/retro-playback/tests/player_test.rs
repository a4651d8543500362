//! Integration tests for the player
//!
//! Every test runs the real pipeline (decoder threads, transport worker,
//! visualizer loop) against a `NullSink` that pulls in real time, on WAV
//! files written with hound into a temp dir.

use parking_lot::Mutex;
use retro_audio::{EqualizerState, StreamSpec};
use retro_playback::{
    AudioSink, FaultReporter, NullSink, PlaybackError, PlaybackState, Player, PlayerConfig,
    PlayerStatus, RepeatMode, SinkFeed,
};
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ===== Test Helpers =====

fn write_wav(dir: &Path, name: &str, seconds: f32, f: impl Fn(usize) -> f32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 44_100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..(seconds * 44_100.0) as usize {
        let value = (f(i).clamp(-1.0, 1.0) * 32767.0) as i16;
        writer.write_sample(value).unwrap();
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn tone(freq: f32) -> impl Fn(usize) -> f32 {
    move |i| (2.0 * PI * freq * i as f32 / 44_100.0).sin() * 0.6
}

fn silence(_: usize) -> f32 {
    0.0
}

fn player() -> Player {
    player_with(PlayerConfig::default())
}

fn player_with(config: PlayerConfig) -> Player {
    let sink = NullSink::new(StreamSpec::cd()).with_period(441);
    Player::new(config, Box::new(sink)).unwrap()
}

/// Poll until `done` holds or `timeout` passes; returns the last status
fn wait_for(
    player: &Player,
    timeout: Duration,
    done: impl Fn(&PlayerStatus) -> bool,
) -> PlayerStatus {
    let deadline = Instant::now() + timeout;
    loop {
        let status = player.status();
        if done(&status) || Instant::now() >= deadline {
            return status;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// NullSink wrapper that fails its first `fail_first` starts and keeps the
/// fault reporter of the running feed
struct ScriptedSink {
    inner: NullSink,
    starts: Arc<AtomicUsize>,
    fail_first: usize,
    reporter: Arc<Mutex<Option<FaultReporter>>>,
}

impl ScriptedSink {
    fn new(fail_first: usize) -> (Self, Arc<AtomicUsize>, Arc<Mutex<Option<FaultReporter>>>) {
        let starts = Arc::new(AtomicUsize::new(0));
        let reporter = Arc::new(Mutex::new(None));
        let sink = Self {
            inner: NullSink::new(StreamSpec::cd()),
            starts: starts.clone(),
            fail_first,
            reporter: reporter.clone(),
        };
        (sink, starts, reporter)
    }
}

impl AudioSink for ScriptedSink {
    fn spec(&self) -> StreamSpec {
        self.inner.spec()
    }

    fn start(&mut self, feed: SinkFeed) -> retro_playback::Result<()> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_first {
            return Err(PlaybackError::DeviceUnavailable("device busy".into()));
        }
        *self.reporter.lock() = Some(feed.fault_reporter());
        self.inner.start(feed)
    }

    fn stop(&mut self) {
        self.inner.stop();
    }
}

const SETTLE: Duration = Duration::from_secs(3);

// ===== Transport state machine =====

#[test]
fn load_play_pause_stop() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "a.wav", 2.0, tone(440.0));
    let player = player();

    assert_eq!(player.status().state, PlaybackState::Stopped);

    let track = player.load(&path).unwrap();
    assert_eq!(track.title, "a");
    assert_eq!(player.status().state, PlaybackState::Paused);
    assert_eq!(player.position(), Duration::ZERO);

    player.play().unwrap();
    assert_eq!(player.status().state, PlaybackState::Playing);
    let status = wait_for(&player, SETTLE, |s| s.position > Duration::from_millis(100));
    assert!(status.position > Duration::from_millis(100));

    player.pause().unwrap();
    // Let a buffer already in flight land
    thread::sleep(Duration::from_millis(50));
    let paused_at = player.position();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(player.status().state, PlaybackState::Paused);
    assert_eq!(player.position(), paused_at);

    player.stop().unwrap();
    let status = player.status();
    assert_eq!(status.state, PlaybackState::Stopped);
    assert_eq!(status.position, Duration::ZERO);
    assert!(status.track.is_some(), "stop keeps the track");
}

#[test]
fn commands_without_a_track_fail_cleanly() {
    let player = player();
    assert!(matches!(player.play(), Err(PlaybackError::NoTrackLoaded)));
    assert!(matches!(
        player.seek(Duration::from_secs(1)),
        Err(PlaybackError::NoTrackLoaded)
    ));
    assert!(matches!(player.next(), Err(PlaybackError::PlaylistEmpty)));
    assert!(matches!(
        player.load("/nowhere/missing.mp3"),
        Err(PlaybackError::FileNotFound(_))
    ));
    assert!(matches!(
        player.load("/nowhere/cover.png"),
        Err(PlaybackError::UnsupportedFormat(_))
    ));
}

#[test]
fn seek_while_stopped_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "a.wav", 1.0, tone(440.0));
    let player = player();
    player.load(&path).unwrap();
    player.stop().unwrap();

    assert!(matches!(
        player.seek(Duration::from_millis(500)),
        Err(PlaybackError::InvalidOperation(_))
    ));
}

// ===== Seeking =====

#[test]
fn seek_moves_position_within_queue_latency() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "long.wav", 4.0, tone(220.0));
    let player = player();
    player.load(&path).unwrap();
    player.play().unwrap();
    thread::sleep(Duration::from_millis(150));

    let target = Duration::from_secs(2);
    player.seek(target).unwrap();

    // Rebased immediately, before any audio from the new position played
    let position = player.position();
    assert!(position >= target && position < target + Duration::from_millis(50));

    let status = wait_for(&player, SETTLE, |s| s.state == PlaybackState::Playing);
    assert_eq!(status.state, PlaybackState::Playing);

    thread::sleep(Duration::from_millis(100));
    let position = player.position();
    // Never behind the target; ahead by at most what has played since
    // plus one queue's worth of audio
    assert!(position >= target, "{:?} behind seek target", position);
    assert!(
        position < target + Duration::from_millis(100 + 200 + 100),
        "{:?} too far past seek target",
        position
    );
}

#[test]
fn seek_while_paused_resumes_paused() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "long.wav", 3.0, tone(220.0));
    let player = player();
    player.load(&path).unwrap();
    player.play().unwrap();
    thread::sleep(Duration::from_millis(100));
    player.pause().unwrap();

    player.seek(Duration::from_millis(1500)).unwrap();
    let status = wait_for(&player, SETTLE, |s| s.state != PlaybackState::Seeking);
    assert_eq!(status.state, PlaybackState::Paused);
    assert_eq!(status.position, Duration::from_millis(1500));
}

#[test]
fn seek_before_first_play_starts_there() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "long.wav", 3.0, tone(220.0));
    let player = player();
    player.load(&path).unwrap();

    player.seek(Duration::from_secs(2)).unwrap();
    assert_eq!(player.status().state, PlaybackState::Paused);
    player.play().unwrap();

    thread::sleep(Duration::from_millis(200));
    assert!(player.position() >= Duration::from_secs(2));
}

#[test]
fn rapid_seeks_land_on_the_last_one() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "long.wav", 5.0, tone(220.0));
    let player = player();
    player.load(&path).unwrap();
    player.play().unwrap();
    thread::sleep(Duration::from_millis(50));

    for ms in [500, 3000, 1000, 4000, 2500] {
        player.seek(Duration::from_millis(ms)).unwrap();
    }

    let status = wait_for(&player, SETTLE, |s| s.state == PlaybackState::Playing);
    assert_eq!(status.state, PlaybackState::Playing);
    thread::sleep(Duration::from_millis(100));
    let position = player.position();
    assert!(position >= Duration::from_millis(2500));
    assert!(position < Duration::from_millis(2900));
}

#[test]
fn seek_past_end_clamps_to_duration() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "short.wav", 1.0, tone(220.0));
    let player = player();
    player.load(&path).unwrap();
    player.play().unwrap();

    player.seek(Duration::from_secs(60)).unwrap();
    assert!(player.position() <= Duration::from_secs(1));

    // Playlist of one, repeat off: ends and stops
    let status = wait_for(&player, SETTLE, |s| s.state == PlaybackState::Stopped);
    assert_eq!(status.state, PlaybackState::Stopped);
}

// ===== Restart determinism =====

#[test]
fn stop_and_replay_produces_identical_audio() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "chirp.wav", 0.6, |i| {
        let t = i as f32 / 44_100.0;
        (2.0 * PI * (200.0 + 900.0 * t) * t).sin() * 0.5 + 0.01
    });

    let capture = Arc::new(Mutex::new(Vec::new()));
    let sink = NullSink::new(StreamSpec::cd())
        .with_period(441)
        .with_capture(capture.clone());
    let mut config = PlayerConfig::default();
    config.playback.volume = 100;
    config.equalizer = EqualizerState::new(6.0, -3.0, 2.0);
    let player = Player::new(config, Box::new(sink)).unwrap();

    let mut runs = Vec::new();
    player.load(&path).unwrap();
    for _ in 0..2 {
        capture.lock().clear();
        player.play().unwrap();
        let status = wait_for(&player, SETTLE, |s| s.state == PlaybackState::Stopped);
        assert_eq!(status.state, PlaybackState::Stopped);
        // Underrun gaps are exact zeros; the signal never is
        let audio: Vec<u32> = capture
            .lock()
            .iter()
            .filter(|s| **s != 0.0)
            .map(|s| s.to_bits())
            .collect();
        runs.push(audio);
    }

    assert!(runs[0].len() > 44_100);
    assert_eq!(runs[0], runs[1]);
}

// ===== Playlist =====

#[test]
fn end_of_track_advances_playlist() {
    let dir = TempDir::new().unwrap();
    let a = write_wav(dir.path(), "a.wav", 0.3, tone(300.0));
    let b = write_wav(dir.path(), "b.wav", 0.3, tone(600.0));
    let player = player();

    assert_eq!(player.enqueue([&a, &b]).unwrap(), 2);
    player.play().unwrap();
    assert_eq!(player.status().playlist_index, Some(0));

    let status = wait_for(&player, SETTLE, |s| s.playlist_index == Some(1));
    assert_eq!(status.playlist_index, Some(1));
    assert_eq!(status.track.unwrap().title, "b");

    let status = wait_for(&player, SETTLE, |s| s.state == PlaybackState::Stopped);
    assert_eq!(status.state, PlaybackState::Stopped);
}

#[test]
fn repeat_one_replays_the_track() {
    let dir = TempDir::new().unwrap();
    let a = write_wav(dir.path(), "a.wav", 0.25, tone(300.0));
    let b = write_wav(dir.path(), "b.wav", 0.25, tone(600.0));
    let player = player();
    player.enqueue([&a, &b]).unwrap();
    player.set_repeat(RepeatMode::One).unwrap();
    player.play().unwrap();

    thread::sleep(Duration::from_millis(700));
    let status = player.status();
    assert_eq!(status.playlist_index, Some(0));
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.repeat, RepeatMode::One);
}

#[test]
fn next_and_previous_keep_playing() {
    let dir = TempDir::new().unwrap();
    let paths: Vec<_> = (0..3)
        .map(|i| write_wav(dir.path(), &format!("t{}.wav", i), 2.0, tone(200.0)))
        .collect();
    let player = player();
    player.enqueue(&paths).unwrap();
    player.play().unwrap();

    player.next().unwrap();
    let status = player.status();
    assert_eq!(status.playlist_index, Some(1));
    assert_eq!(status.state, PlaybackState::Playing);

    player.previous().unwrap();
    player.previous().unwrap();
    assert_eq!(player.status().playlist_index, Some(2));

    player.pause().unwrap();
    player.next().unwrap();
    let status = player.status();
    assert_eq!(status.playlist_index, Some(2));
    assert_eq!(status.state, PlaybackState::Stopped);
}

#[test]
fn crossfade_ramps_outgoing_track_down() {
    let dir = TempDir::new().unwrap();
    let loud = write_wav(dir.path(), "loud.wav", 3.0, |_| 0.5);
    let quiet = write_wav(dir.path(), "quiet.wav", 3.0, silence);

    let capture = Arc::new(Mutex::new(Vec::new()));
    let sink = NullSink::new(StreamSpec::cd())
        .with_period(441)
        .with_capture(capture.clone());
    let mut config = PlayerConfig::default();
    config.playback.volume = 100;
    config.playback.crossfade_ms = 300;
    let player = Player::new(config, Box::new(sink)).unwrap();

    player.enqueue([&loud, &quiet]).unwrap();
    player.play().unwrap();
    wait_for(&player, SETTLE, |s| s.position > Duration::from_millis(400));

    player.next().unwrap();
    let status = player.status();
    assert_eq!(status.playlist_index, Some(1));
    assert_eq!(status.state, PlaybackState::Playing);

    wait_for(&player, SETTLE, |s| s.position > Duration::from_millis(600));
    player.stop().unwrap();

    let left: Vec<f32> = capture.lock().iter().step_by(2).copied().collect();
    // Samples strictly between the two levels only exist during a fade
    let ramp: Vec<f32> = left
        .iter()
        .copied()
        .filter(|s| *s > 0.05 && *s < 0.45)
        .collect();
    // A 300 ms equal-power fade spends about 190 ms in that band
    assert!(ramp.len() > 4_000, "only {} ramp samples", ramp.len());
    assert!(ramp.windows(2).all(|w| w[1] <= w[0] + 1e-4));

    let end = left.len().saturating_sub(4_410);
    assert!(left[end..].iter().all(|s| s.abs() < 0.01));
}

#[test]
fn without_crossfade_next_is_a_hard_cut() {
    let dir = TempDir::new().unwrap();
    let loud = write_wav(dir.path(), "loud.wav", 3.0, |_| 0.5);
    let quiet = write_wav(dir.path(), "quiet.wav", 3.0, silence);

    let capture = Arc::new(Mutex::new(Vec::new()));
    let sink = NullSink::new(StreamSpec::cd())
        .with_period(441)
        .with_capture(capture.clone());
    let mut config = PlayerConfig::default();
    config.playback.volume = 100;
    let player = Player::new(config, Box::new(sink)).unwrap();

    player.enqueue([&loud, &quiet]).unwrap();
    player.play().unwrap();
    wait_for(&player, SETTLE, |s| s.position > Duration::from_millis(400));
    player.next().unwrap();
    wait_for(&player, SETTLE, |s| s.position > Duration::from_millis(300));
    player.stop().unwrap();

    let left: Vec<f32> = capture.lock().iter().step_by(2).copied().collect();
    assert!(left.iter().any(|s| *s > 0.45));
    assert!(!left.iter().any(|s| *s > 0.05 && *s < 0.45));
}

#[test]
fn unsupported_entry_is_skipped() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("notes.flac");
    std::fs::write(&bad, "not audio at all\n".repeat(100)).unwrap();
    let good = write_wav(dir.path(), "good.wav", 1.0, tone(440.0));

    let player = player();
    player.enqueue([&bad, &good]).unwrap();
    player.play().unwrap();

    let status = player.status();
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.playlist_index, Some(1));
}

#[test]
fn gives_up_after_one_pass_of_unplayable_entries() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("one.flac");
    let second = dir.path().join("two.mp3");
    std::fs::write(&first, "junk".repeat(500)).unwrap();
    std::fs::write(&second, "junk".repeat(500)).unwrap();

    let player = player();
    player.set_repeat(RepeatMode::All).unwrap();
    player.enqueue([&first, &second]).unwrap();

    let result = player.play();
    assert!(matches!(result, Err(PlaybackError::UnsupportedFormat(_))));
    let status = player.status();
    assert_eq!(status.state, PlaybackState::Stopped);
    assert!(status.message.is_some());
}

// ===== Visualizer =====

#[test]
fn silent_file_gives_near_zero_snapshots() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "silence.wav", 1.0, silence);
    let player = player();
    player.load(&path).unwrap();
    player.play().unwrap();

    thread::sleep(Duration::from_millis(400));
    let snapshot = player.spectrum().expect("visualizer publishes while playing");
    assert_eq!(snapshot.bars.len(), PlayerConfig::default().spectrum.bars);
    assert!(snapshot.peak() < 0.05, "bars {:?}", snapshot.bars);
    assert!(snapshot.rms < 1e-3);
}

#[test]
fn tone_shows_up_in_spectrum() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "tone.wav", 2.0, tone(1000.0));
    let player = player();
    player.load(&path).unwrap();
    player.play().unwrap();

    thread::sleep(Duration::from_millis(500));
    let snapshot = player.spectrum().unwrap();
    assert!(snapshot.peak() > 0.3);
    assert!(snapshot.bars.iter().all(|b| (0.0..=1.0).contains(b)));

    player.stop().unwrap();
    thread::sleep(Duration::from_millis(150));
    assert!(player.spectrum().is_none());
}

#[test]
fn first_snapshot_after_seek_shows_only_new_audio() {
    let dir = TempDir::new().unwrap();
    let beep = tone(1000.0);
    // 1.5 s of tone, then silence
    let path = write_wav(dir.path(), "beep.wav", 4.0, move |i| {
        if i < 66_150 {
            beep(i)
        } else {
            0.0
        }
    });
    let player = player();
    player.load(&path).unwrap();
    player.play().unwrap();

    for round in 0..3 {
        player.seek(Duration::from_millis(100)).unwrap();
        wait_for(&player, SETTLE, |s| {
            s.state == PlaybackState::Playing && s.position > Duration::from_millis(500)
        });
        thread::sleep(Duration::from_millis(100));
        let snapshot = player.spectrum().unwrap();
        assert!(snapshot.peak() > 0.3, "round {}: tone not shown", round);

        player.seek(Duration::from_secs(3)).unwrap();
        let deadline = Instant::now() + SETTLE;
        let snapshot = loop {
            match player.spectrum() {
                Some(s) if s.position >= Duration::from_secs(3) => break s,
                _ if Instant::now() >= deadline => panic!("round {}: no snapshot", round),
                _ => thread::sleep(Duration::from_millis(2)),
            }
        };
        assert!(
            snapshot.rms < 0.01,
            "round {}: rms {} at {:?}",
            round,
            snapshot.rms,
            snapshot.position
        );
        assert!(snapshot.peak() < 0.05, "round {}: bars {:?}", round, snapshot.bars);
    }
}

// ===== Controls =====

#[test]
fn equalizer_and_volume_show_in_status() {
    let player = player();
    let applied = player.set_equalizer(EqualizerState::new(20.0, f32::NAN, -3.5));
    assert_eq!(applied, EqualizerState::new(12.0, 0.0, -3.5));

    assert_eq!(player.set_volume(250), 100);
    player.set_muted(true);

    let status = player.status();
    assert_eq!(status.equalizer, applied);
    assert_eq!(status.volume, 100);
    assert!(status.muted);
}

// ===== Output device =====

#[test]
fn sink_start_is_retried_once() {
    let (sink, starts, _) = ScriptedSink::new(1);
    let player = Player::new(PlayerConfig::default(), Box::new(sink)).unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    player.shutdown();

    let (sink, starts, _) = ScriptedSink::new(2);
    let result = Player::new(PlayerConfig::default(), Box::new(sink));
    assert!(matches!(result, Err(PlaybackError::DeviceUnavailable(_))));
    assert_eq!(starts.load(Ordering::SeqCst), 2);
}

#[test]
fn second_device_fault_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(dir.path(), "a.wav", 3.0, tone(440.0));
    let (sink, starts, reporter) = ScriptedSink::new(0);
    let player = Player::new(PlayerConfig::default(), Box::new(sink)).unwrap();
    player.load(&path).unwrap();
    player.play().unwrap();

    reporter.lock().clone().unwrap().report("stream invalidated");
    wait_for(&player, SETTLE, |_| starts.load(Ordering::SeqCst) == 2);
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(player.status().state, PlaybackState::Playing);

    reporter.lock().clone().unwrap().report("stream invalidated again");
    let status = wait_for(&player, SETTLE, |s| s.state == PlaybackState::Stopped);
    assert_eq!(status.state, PlaybackState::Stopped);
    assert!(status.message.is_some());
    assert!(matches!(
        player.play(),
        Err(PlaybackError::DeviceUnavailable(_))
    ));
}
