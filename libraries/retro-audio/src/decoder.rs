//! Decoder adapter: any supported file in, fixed-size PCM frames out
//!
//! # Architecture
//!
//! [`open_decoder`] picks a [`FrameDecoder`] implementation once, from the
//! track's format tag. Everything downstream only sees the trait, so the
//! per-format dispatch never happens again per frame.
//!
//! [`SymphoniaDecoder`] streams packets from disk on demand:
//!
//! 1. **Packet decode**: symphonia demuxes and decodes one packet at a time.
//! 2. **Channel mapping** (`map_channels`): planar buffers of any sample type
//!    are converted to interleaved `f32` in the target layout. Mono sources
//!    are duplicated, sources with more channels than the target are averaged
//!    down.
//! 3. **Rate conversion**: a [`StreamResampler`] runs only when the file rate
//!    differs from the target.
//! 4. **Framing**: output is cut into frames of exactly `frame_len` sample
//!    frames; only the last frame of a stream may be shorter.
//!
//! Recoverable packet errors are skipped. A run of them, or any demuxer
//! failure other than end of file, ends the stream with `CorruptStream`.

use crate::error::{AudioError, Result};
use crate::frame::{AudioFrame, StreamSpec};
use crate::resample::StreamResampler;
use crate::track::Track;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::IntoSample;
use symphonia::core::errors::{Error as SymphoniaError, SeekErrorKind};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;
use symphonia::core::units::{Time, TimeBase};

/// Consecutive undecodable packets tolerated before the stream is declared corrupt
const MAX_CONSECUTIVE_DECODE_ERRORS: u32 = 8;

/// Source of fixed-format PCM frames for one track
///
/// Implementations are driven from the decode worker thread and may block on
/// file I/O.
pub trait FrameDecoder: Send {
    /// Layout of every frame this decoder produces
    fn spec(&self) -> StreamSpec;

    /// Next frame, or `None` at end of stream.
    ///
    /// A `CorruptStream` error means the rest of the track cannot be read;
    /// callers treat it as an early end of stream.
    fn next_frame(&mut self) -> Result<Option<AudioFrame>>;

    /// Reposition so the next frame starts at `position`.
    ///
    /// Positions past the end are clamped. Returns the position the next
    /// frame will start at.
    fn seek(&mut self, position: Duration) -> Result<Duration>;

    /// Total length, when the container reports it
    fn duration(&self) -> Option<Duration>;

    /// Restart from the beginning
    fn reset(&mut self) -> Result<()> {
        self.seek(Duration::ZERO).map(|_| ())
    }
}

/// Open a decoder for `track`, producing frames in `spec` layout
///
/// # Errors
/// `UnsupportedFormat` if no decoder handles the container or codec,
/// `FileNotFound` if the file is missing.
pub fn open_decoder(
    track: &Track,
    spec: StreamSpec,
    frame_len: usize,
) -> Result<Box<dyn FrameDecoder>> {
    if !track.format.is_decodable() {
        return Err(AudioError::UnsupportedFormat(format!(
            "no decoder for .{} files",
            track.format
        )));
    }

    let decoder = SymphoniaDecoder::open(&track.path, spec, frame_len)?;
    Ok(Box::new(decoder))
}

/// Streaming symphonia decoder
pub struct SymphoniaDecoder {
    path: PathBuf,
    spec: StreamSpec,
    source_rate: u32,
    frame_len: usize,

    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    duration: Option<Duration>,
    resampler: Option<StreamResampler>,

    /// Interleaved output waiting to be cut into frames
    pending: Vec<f32>,
    /// Channel-mapped samples at the source rate, reused per packet
    scratch: Vec<f32>,
    /// Target-rate frames to drop after an accurate seek lands early
    skip_frames: u64,

    frame_index: u64,
    position: u64,
    consecutive_errors: u32,
    eof: bool,
    flushed: bool,
}

impl SymphoniaDecoder {
    /// Open `path` and prepare to decode into `spec`
    pub fn open(path: impl AsRef<Path>, spec: StreamSpec, frame_len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let frame_len = frame_len.max(1);

        let file = File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => AudioError::FileNotFound(path.display().to_string()),
            _ => AudioError::Io(e),
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                AudioError::UnsupportedFormat(format!("{}: {}", path.display(), e))
            })?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                AudioError::UnsupportedFormat(format!("{}: no audio track", path.display()))
            })?;

        let track_id = track.id;
        let params = track.codec_params.clone();
        let source_rate = params.sample_rate.ok_or_else(|| {
            AudioError::UnsupportedFormat(format!("{}: unknown sample rate", path.display()))
        })?;
        let time_base = params.time_base;
        let duration = match (params.n_frames, time_base) {
            (Some(frames), Some(tb)) => Some(time_to_duration(tb.calc_time(frames))),
            (Some(frames), None) => Some(Duration::from_secs_f64(
                frames as f64 / f64::from(source_rate),
            )),
            _ => None,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| AudioError::UnsupportedFormat(format!("{}: {}", path.display(), e)))?;

        let resampler = if source_rate == spec.sample_rate {
            None
        } else {
            Some(StreamResampler::new(
                source_rate,
                spec.sample_rate,
                usize::from(spec.channels),
            )?)
        };

        tracing::debug!(
            "Opened {} ({} Hz -> {} Hz, {} channels, duration {:?})",
            path.display(),
            source_rate,
            spec.sample_rate,
            spec.channels,
            duration
        );

        Ok(Self {
            path,
            spec,
            source_rate,
            frame_len,
            format,
            decoder,
            track_id,
            time_base,
            duration,
            resampler,
            pending: Vec::with_capacity(frame_len * usize::from(spec.channels) * 4),
            scratch: Vec::new(),
            skip_frames: 0,
            frame_index: 0,
            position: 0,
            consecutive_errors: 0,
            eof: false,
            flushed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sample rate of the file itself
    pub fn source_sample_rate(&self) -> u32 {
        self.source_rate
    }

    /// Decode one packet into `pending`. Returns `false` at end of file.
    fn decode_packet(&mut self) -> Result<bool> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(false);
            }
            Err(SymphoniaError::ResetRequired) => {
                self.rebuild_decoder()?;
                return Ok(true);
            }
            Err(e) => {
                return Err(AudioError::CorruptStream(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if packet.track_id() != self.track_id {
            return Ok(true);
        }

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                self.consecutive_errors = 0;
                self.scratch.clear();
                map_channels(decoded, usize::from(self.spec.channels), &mut self.scratch);
            }
            Err(SymphoniaError::DecodeError(msg)) => {
                self.consecutive_errors += 1;
                tracing::debug!("Skipping bad packet in {}: {}", self.path.display(), msg);
                if self.consecutive_errors >= MAX_CONSECUTIVE_DECODE_ERRORS {
                    return Err(AudioError::CorruptStream(format!(
                        "{}: {} consecutive undecodable packets",
                        self.path.display(),
                        self.consecutive_errors
                    )));
                }
                return Ok(true);
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(false);
            }
            Err(e) => {
                return Err(AudioError::CorruptStream(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        }

        match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&self.scratch, &mut self.pending)?,
            None => self.pending.extend_from_slice(&self.scratch),
        }

        Ok(true)
    }

    /// The stream's track list changed (chained streams); start a new
    /// codec decoder from the new parameters
    fn rebuild_decoder(&mut self) -> Result<()> {
        let track = self
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                AudioError::CorruptStream(format!("{}: audio track vanished", self.path.display()))
            })?;

        let params = &track.codec_params;
        if params.sample_rate.is_some_and(|rate| rate != self.source_rate) {
            return Err(AudioError::CorruptStream(format!(
                "{}: sample rate changed mid-stream",
                self.path.display()
            )));
        }

        self.decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| AudioError::CorruptStream(format!("{}: {}", self.path.display(), e)))?;
        self.track_id = track.id;
        self.time_base = params.time_base;
        tracing::debug!("Decoder rebuilt for {}", self.path.display());
        Ok(())
    }

    fn drop_skipped(&mut self) {
        if self.skip_frames == 0 {
            return;
        }
        let channels = usize::from(self.spec.channels);
        let available = (self.pending.len() / channels) as u64;
        let n = self.skip_frames.min(available);
        self.pending.drain(..n as usize * channels);
        self.skip_frames -= n;
    }
}

impl FrameDecoder for SymphoniaDecoder {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        let channels = usize::from(self.spec.channels);
        let wanted = self.frame_len * channels;

        loop {
            self.drop_skipped();
            if self.pending.len() >= wanted {
                break;
            }
            if self.eof {
                if self.flushed {
                    break;
                }
                if let Some(resampler) = self.resampler.as_mut() {
                    resampler.flush(&mut self.pending)?;
                }
                self.flushed = true;
                continue;
            }
            if !self.decode_packet()? {
                self.eof = true;
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = wanted.min(self.pending.len());
        let samples: Vec<f32> = self.pending.drain(..take).collect();
        let frame = AudioFrame::new(samples, self.spec, self.frame_index, self.position);
        self.frame_index += 1;
        self.position = frame.end_position();

        Ok(Some(frame))
    }

    fn seek(&mut self, position: Duration) -> Result<Duration> {
        let position = match self.duration {
            Some(duration) if position > duration => duration,
            _ => position,
        };

        self.pending.clear();
        self.skip_frames = 0;
        self.frame_index = 0;
        self.consecutive_errors = 0;
        self.flushed = false;
        self.eof = false;
        self.position = self.spec.duration_to_frames(position);
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }

        let seeked = self.format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::from(position),
                track_id: Some(self.track_id),
            },
        );

        match seeked {
            Ok(seeked) => {
                self.decoder.reset();
                if let Some(tb) = self.time_base {
                    let early = seeked.required_ts.saturating_sub(seeked.actual_ts);
                    let early = time_to_duration(tb.calc_time(early));
                    self.skip_frames = self.spec.duration_to_frames(early);
                }
                Ok(position)
            }
            Err(SymphoniaError::SeekError(SeekErrorKind::OutOfRange)) => {
                self.eof = true;
                self.flushed = true;
                Ok(position)
            }
            Err(e) => Err(AudioError::SeekError(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

fn time_to_duration(time: Time) -> Duration {
    Duration::from_secs(time.seconds) + Duration::from_secs_f64(time.frac.clamp(0.0, 1.0))
}

/// Convert any symphonia buffer to interleaved f32 in `out_channels` layout
fn map_channels(decoded: AudioBufferRef<'_>, out_channels: usize, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::F32(buf) => interleave(&buf, out_channels, out),
        AudioBufferRef::F64(buf) => interleave(&buf, out_channels, out),
        AudioBufferRef::S8(buf) => interleave(&buf, out_channels, out),
        AudioBufferRef::S16(buf) => interleave(&buf, out_channels, out),
        AudioBufferRef::S24(buf) => interleave(&buf, out_channels, out),
        AudioBufferRef::S32(buf) => interleave(&buf, out_channels, out),
        AudioBufferRef::U8(buf) => interleave(&buf, out_channels, out),
        AudioBufferRef::U16(buf) => interleave(&buf, out_channels, out),
        AudioBufferRef::U24(buf) => interleave(&buf, out_channels, out),
        AudioBufferRef::U32(buf) => interleave(&buf, out_channels, out),
    }
}

/// Output channel `c` is the mean of every source channel `s` with
/// `s % out_channels == c`; when the source has fewer channels they wrap.
fn interleave<T>(buf: &AudioBuffer<T>, out_channels: usize, out: &mut Vec<f32>)
where
    T: Sample + IntoSample<f32>,
{
    let src_channels = buf.spec().channels.count();
    let frames = buf.frames();
    if src_channels == 0 || frames == 0 {
        return;
    }

    out.reserve(frames * out_channels);
    for frame_idx in 0..frames {
        for out_ch in 0..out_channels {
            if src_channels <= out_channels {
                let sample: f32 = buf.chan(out_ch % src_channels)[frame_idx].into_sample();
                out.push(sample);
            } else {
                let mut sum = 0.0_f32;
                let mut count = 0_u32;
                for src_ch in (out_ch..src_channels).step_by(out_channels) {
                    let sample: f32 = buf.chan(src_ch)[frame_idx].into_sample();
                    sum += sample;
                    count += 1;
                }
                out.push(sum / count.max(1) as f32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::AudioFormat;

    #[test]
    fn formats_without_a_codec_fail_to_open() {
        for (name, format) in [("legacy.wma", AudioFormat::Wma), ("voice.opus", AudioFormat::Opus)] {
            let track = Track {
                path: PathBuf::from("/music").join(name),
                format,
                title: name.into(),
                duration: None,
            };
            let err = open_decoder(&track, StreamSpec::cd(), 1024).err().unwrap();
            assert!(matches!(err, AudioError::UnsupportedFormat(_)), "{}", name);
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = SymphoniaDecoder::open("/nowhere/at/all.wav", StreamSpec::cd(), 1024)
            .err()
            .unwrap();
        assert!(matches!(err, AudioError::FileNotFound(_)));
    }

    #[test]
    fn garbage_bytes_are_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, vec![0x5a_u8; 4096]).unwrap();

        let err = SymphoniaDecoder::open(&path, StreamSpec::cd(), 1024)
            .err()
            .unwrap();
        assert!(matches!(err, AudioError::UnsupportedFormat(_)));
    }

    #[test]
    fn time_conversion_keeps_fraction() {
        let d = time_to_duration(Time::new(2, 0.5));
        assert_eq!(d, Duration::from_millis(2500));
    }
}
