//! Track descriptors and supported file formats

use crate::error::{AudioError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

/// Container formats the player accepts by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Wav,
    Flac,
    Ogg,
    Aac,
    Wma,
    M4a,
    Aiff,
    Opus,
}

impl AudioFormat {
    /// Every accepted format, in display order
    pub const ALL: [AudioFormat; 9] = [
        AudioFormat::Mp3,
        AudioFormat::Wav,
        AudioFormat::Flac,
        AudioFormat::Ogg,
        AudioFormat::Aac,
        AudioFormat::Wma,
        AudioFormat::M4a,
        AudioFormat::Aiff,
        AudioFormat::Opus,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Aac => "aac",
            AudioFormat::Wma => "wma",
            AudioFormat::M4a => "m4a",
            AudioFormat::Aiff => "aiff",
            AudioFormat::Opus => "opus",
        }
    }

    /// Look up a format by extension (case-insensitive, `aif` accepted)
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        if ext == "aif" {
            return Some(AudioFormat::Aiff);
        }
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }

    /// Look up a format from a path's extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether a decoder is available for this container.
    ///
    /// WMA and Opus are accepted into playlists but symphonia has no codec
    /// for either, so opening them fails with `UnsupportedFormat`.
    pub fn is_decodable(&self) -> bool {
        !matches!(self, AudioFormat::Wma | AudioFormat::Opus)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A playable file
///
/// Creating a `Track` only reads container headers; no decoder is opened
/// until playback starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub path: PathBuf,
    pub format: AudioFormat,
    pub title: String,
    pub duration: Option<Duration>,
}

impl Track {
    /// Describe a file without touching it.
    ///
    /// Fails with `UnsupportedFormat` if the extension is not one of
    /// [`AudioFormat::ALL`].
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = AudioFormat::from_path(&path).ok_or_else(|| {
            AudioError::UnsupportedFormat(format!("{} has no recognized extension", path.display()))
        })?;
        let title = file_stem_title(&path);

        Ok(Self {
            path,
            format,
            title,
            duration: None,
        })
    }

    /// Describe a file and read its title and duration from the container.
    ///
    /// Probe failures are not fatal here; the track keeps its file-name
    /// title and an unknown duration, and the real error surfaces when the
    /// decoder is opened.
    pub fn probe(path: impl Into<PathBuf>) -> Result<Self> {
        let mut track = Self::new(path)?;
        if !track.path.exists() {
            return Err(AudioError::FileNotFound(track.path.display().to_string()));
        }

        match read_tags(&track.path) {
            Ok((title, duration)) => {
                if let Some(title) = title {
                    track.title = title;
                }
                track.duration = duration;
            }
            Err(e) => {
                tracing::debug!("Could not read tags from {}: {}", track.path.display(), e);
            }
        }

        Ok(track)
    }
}

fn file_stem_title(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn title_from_revision(revision: &MetadataRevision) -> Option<String> {
    revision
        .tags()
        .iter()
        .find(|tag| tag.std_key == Some(StandardTagKey::TrackTitle))
        .map(|tag| tag.value.to_string())
        .filter(|title| !title.trim().is_empty())
}

fn read_tags(path: &Path) -> Result<(Option<String>, Option<Duration>)> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mut probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;

    // ID3v2 and friends live outside the container; check both places
    let mut title = probed
        .metadata
        .get()
        .as_ref()
        .and_then(|m| m.current())
        .and_then(title_from_revision);
    if title.is_none() {
        title = probed
            .format
            .metadata()
            .current()
            .and_then(title_from_revision);
    }

    let duration = probed.format.default_track().and_then(|track| {
        let params = &track.codec_params;
        match (params.n_frames, params.time_base, params.sample_rate) {
            (Some(frames), Some(tb), _) => {
                let time = tb.calc_time(frames);
                Some(Duration::from_secs_f64(time.seconds as f64 + time.frac))
            }
            (Some(frames), None, Some(rate)) if rate > 0 => {
                Some(Duration::from_secs_f64(frames as f64 / f64::from(rate)))
            }
            _ => None,
        }
    });

    Ok((title, duration))
}
