/// Terminal rendering of player status and spectrum
use retro_audio::SpectrumSnapshot;
use retro_playback::{PlaybackState, PlayerStatus};
use serde::Serialize;
use std::io::{self, Write};
use std::time::Duration;

const BAR_GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// One bar per value; empty bars are blank
pub fn render_bars(bars: &[f32]) -> String {
    bars.iter()
        .map(|&value| {
            if value <= 0.01 {
                ' '
            } else {
                let level = (value.clamp(0.0, 1.0) * (BAR_GLYPHS.len() - 1) as f32).round();
                BAR_GLYPHS[level as usize]
            }
        })
        .collect()
}

/// `m:ss`, or `h:mm:ss` past an hour
pub fn format_time(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs / 60) % 60, secs % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn state_label(state: PlaybackState) -> &'static str {
    match state {
        PlaybackState::Stopped => "stopped",
        PlaybackState::Playing => "playing",
        PlaybackState::Paused => "paused",
        PlaybackState::Seeking => "seeking",
    }
}

/// Single status line: state, position, title, bars
pub fn status_line(status: &PlayerStatus, snapshot: Option<&SpectrumSnapshot>) -> String {
    let title = status.track.as_ref().map_or("-", |t| t.title.as_str());
    let total = status
        .duration
        .map_or_else(|| "--:--".to_string(), format_time);
    let bars = snapshot.map(|s| render_bars(&s.bars)).unwrap_or_default();
    format!(
        "[{:>7}] {} / {}  {}  |{}|",
        state_label(status.state),
        format_time(status.position),
        total,
        title,
        bars
    )
}

/// Line-per-update record for `--json`
#[derive(Debug, Serialize)]
struct JsonUpdate<'a> {
    state: PlaybackState,
    position_ms: u64,
    duration_ms: Option<u64>,
    title: Option<&'a str>,
    playlist_index: Option<usize>,
    volume: u8,
    underruns: u64,
    bars: Option<&'a [f32]>,
    rms: Option<f32>,
    message: Option<&'a str>,
}

/// Writes status updates to stdout, redrawing one line in text mode
pub struct Printer {
    json: bool,
    last_message: Option<String>,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            last_message: None,
        }
    }

    pub fn update(
        &mut self,
        status: &PlayerStatus,
        snapshot: Option<&SpectrumSnapshot>,
    ) -> io::Result<()> {
        let mut out = io::stdout().lock();
        if self.json {
            let update = JsonUpdate {
                state: status.state,
                position_ms: status.position.as_millis() as u64,
                duration_ms: status.duration.map(|d| d.as_millis() as u64),
                title: status.track.as_ref().map(|t| t.title.as_str()),
                playlist_index: status.playlist_index,
                volume: status.volume,
                underruns: status.underruns,
                bars: snapshot.map(|s| s.bars.as_slice()),
                rms: snapshot.map(|s| s.rms),
                message: status.message.as_deref(),
            };
            serde_json::to_writer(&mut out, &update)?;
            writeln!(out)?;
        } else {
            if status.message.is_some() && status.message != self.last_message {
                if let Some(message) = &status.message {
                    writeln!(out, "\r\x1b[2K{}", message)?;
                }
            }
            write!(out, "\r\x1b[2K{}", status_line(status, snapshot))?;
        }
        self.last_message.clone_from(&status.message);
        out.flush()
    }

    /// End the redrawn line
    pub fn finish(&self) -> io::Result<()> {
        if !self.json {
            writeln!(io::stdout())?;
        }
        Ok(())
    }
}
