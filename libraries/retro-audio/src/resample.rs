//! Streaming sample-rate conversion on top of rubato

use crate::error::{AudioError, Result};
use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};
use std::ops::Range;

/// Input chunk size handed to rubato per call
const CHUNK_FRAMES: usize = 1024;

/// Zero chunks pushed through at flush before giving up on the tail
const MAX_TAIL_CHUNKS: usize = 8;

/// Converts interleaved PCM from one rate to another, accepting input of any
/// length.
///
/// Input is buffered until rubato has a full chunk to work on. Call
/// [`StreamResampler::flush`] at end of stream to drain the remainder.
///
/// Output is aligned with the input: the sinc filter's delay is dropped from
/// the front and pushed out at flush, so the converted stream holds
/// `input_frames * ratio` frames starting at the same instant.
pub struct StreamResampler {
    resampler: SincFixedIn<f32>,
    channels: usize,
    ratio: f64,
    pending: Vec<f32>,
    scratch_in: Vec<Vec<f32>>,
    /// Output frames of filter delay still to discard
    delay_left: usize,
    frames_in: u64,
    frames_out: u64,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let ratio = f64::from(output_rate) / f64::from(input_rate);
        let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, channels)
            .map_err(|e| AudioError::Resampling(e.to_string()))?;
        let delay_left = resampler.output_delay();

        Ok(Self {
            resampler,
            channels,
            ratio,
            pending: Vec::with_capacity(CHUNK_FRAMES * channels * 2),
            scratch_in: vec![Vec::with_capacity(CHUNK_FRAMES); channels],
            delay_left,
            frames_in: 0,
            frames_out: 0,
        })
    }

    /// Feed interleaved input; converted output is appended to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(input);
        self.frames_in += (input.len() / self.channels) as u64;

        loop {
            let needed = self.resampler.input_frames_next() * self.channels;
            if self.pending.len() < needed {
                break;
            }
            self.deinterleave_pending(needed);
            let resampled = self
                .resampler
                .process(&self.scratch_in, None)
                .map_err(|e| AudioError::Resampling(e.to_string()))?;
            self.pending.drain(..needed);
            self.emit(&resampled, out, u64::MAX);
        }

        Ok(())
    }

    /// Convert whatever input is still buffered, including the part held
    /// back by the filter delay
    pub fn flush(&mut self, out: &mut Vec<f32>) -> Result<()> {
        let expected = (self.frames_in as f64 * self.ratio).round() as u64;

        if !self.pending.is_empty() {
            let len = self.pending.len() - self.pending.len() % self.channels;
            self.deinterleave_pending(len);
            let resampled = self
                .resampler
                .process_partial(Some(&self.scratch_in), None)
                .map_err(|e| AudioError::Resampling(e.to_string()))?;
            self.pending.clear();
            self.emit(&resampled, out, expected);
        }

        for _ in 0..MAX_TAIL_CHUNKS {
            if self.frames_out >= expected {
                break;
            }
            let resampled = self
                .resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| AudioError::Resampling(e.to_string()))?;
            self.emit(&resampled, out, expected);
        }

        Ok(())
    }

    /// Drop buffered input and filter history
    pub fn reset(&mut self) {
        self.pending.clear();
        self.resampler.reset();
        self.delay_left = self.resampler.output_delay();
        self.frames_in = 0;
        self.frames_out = 0;
    }

    /// Append rubato output past the remaining delay, stopping at `limit`
    /// frames in total
    fn emit(&mut self, planar: &[Vec<f32>], out: &mut Vec<f32>, limit: u64) {
        let frames = planar.first().map_or(0, Vec::len);
        let skip = self.delay_left.min(frames);
        self.delay_left -= skip;

        let room = usize::try_from(limit.saturating_sub(self.frames_out)).unwrap_or(usize::MAX);
        let take = (frames - skip).min(room);
        interleave_into(planar, skip..skip + take, out);
        self.frames_out += take as u64;
    }

    fn deinterleave_pending(&mut self, samples: usize) {
        for channel in &mut self.scratch_in {
            channel.clear();
        }
        for frame in self.pending[..samples].chunks_exact(self.channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                self.scratch_in[ch].push(sample);
            }
        }
    }
}

fn interleave_into(planar: &[Vec<f32>], frames: Range<usize>, out: &mut Vec<f32>) {
    out.reserve(frames.len() * planar.len());
    for frame_idx in frames {
        for channel in planar {
            out.push(channel[frame_idx]);
        }
    }
}
