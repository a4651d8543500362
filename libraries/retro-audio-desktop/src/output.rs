/// cpal-backed output sink
use crate::device;
use crate::error::{AudioOutputError, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use retro_audio::StreamSpec;
use retro_playback::{AudioSink, SinkFeed};
use std::thread::{self, JoinHandle};

/// Commands sent to the audio thread
enum OutputCommand {
    /// Build a stream pulling from `feed` and start it
    Start {
        feed: SinkFeed,
        reply: Sender<Result<()>>,
    },
    /// Drop the running stream
    Stop,
    /// Shutdown the audio thread
    Shutdown,
}

/// System audio output
///
/// **Architecture**: a dedicated audio thread owns the cpal `Stream`, which
/// is not `Send` on every platform. The sink talks to it over a channel;
/// the stream's data callback calls [`SinkFeed::fill`] directly.
pub struct CpalSink {
    /// Channel to send commands to the audio thread
    command_tx: Sender<OutputCommand>,
    spec: StreamSpec,
    name: String,
    audio_thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Open the default output device at its native configuration
    ///
    /// # Errors
    /// Returns an error if no audio device is found or configuration fails
    pub fn new() -> Result<Self> {
        Self::open(device::default_device()?, None)
    }

    /// Open the output device called `name`
    pub fn with_device(name: &str) -> Result<Self> {
        Self::open(device::find_device(name)?, None)
    }

    /// Open a device, optionally asking for a fixed buffer size in frames
    pub fn open(device: Device, buffer_frames: Option<u32>) -> Result<Self> {
        let name = device::name_of(&device);
        let supported = device.default_output_config()?;
        let sample_format = supported.sample_format();
        let mut config: StreamConfig = supported.config();
        if let Some(frames) = buffer_frames {
            config.buffer_size = cpal::BufferSize::Fixed(frames);
        }

        let spec = StreamSpec::new(config.sample_rate, config.channels)
            .map_err(|e| AudioOutputError::DeviceError(e.to_string()))?;

        let (command_tx, command_rx) = bounded::<OutputCommand>(8);
        let audio_thread = thread::Builder::new()
            .name("retro-cpal-output".into())
            .spawn(move || Self::audio_thread_run(device, config, sample_format, command_rx))
            .map_err(|e| AudioOutputError::DeviceError(e.to_string()))?;

        tracing::info!(
            "Opened '{}': {} Hz, {} channels, {}",
            name,
            spec.sample_rate,
            spec.channels,
            sample_format
        );

        Ok(Self {
            command_tx,
            spec,
            name,
            audio_thread: Some(audio_thread),
        })
    }

    /// Audio thread main loop
    ///
    /// Runs in a dedicated thread and owns the cpal Stream. Processes
    /// commands from the sink via the channel.
    fn audio_thread_run(
        device: Device,
        config: StreamConfig,
        sample_format: SampleFormat,
        command_rx: Receiver<OutputCommand>,
    ) {
        let mut stream: Option<Stream> = None;

        while let Ok(cmd) = command_rx.recv() {
            match cmd {
                OutputCommand::Start { feed, reply } => {
                    // Stop existing stream
                    drop(stream.take());

                    let started = Self::build_stream(&device, &config, sample_format, feed)
                        .and_then(|s| {
                            s.play()?;
                            Ok(s)
                        });
                    match started {
                        Ok(s) => {
                            stream = Some(s);
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            tracing::warn!("Failed to start output stream: {}", e);
                            let _ = reply.send(Err(e));
                        }
                    }
                }
                OutputCommand::Stop => {
                    drop(stream.take());
                }
                OutputCommand::Shutdown => {
                    drop(stream.take());
                    break;
                }
            }
        }
    }

    fn build_stream(
        device: &Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        feed: SinkFeed,
    ) -> Result<Stream> {
        match sample_format {
            SampleFormat::F32 => Self::build_f32_stream(device, config, feed),
            SampleFormat::I16 => Self::build_converting_stream::<i16>(device, config, feed),
            SampleFormat::U16 => Self::build_converting_stream::<u16>(device, config, feed),
            SampleFormat::I32 => Self::build_converting_stream::<i32>(device, config, feed),
            other => Err(AudioOutputError::UnsupportedSampleFormat(other.to_string())),
        }
    }

    fn build_f32_stream(
        device: &Device,
        config: &StreamConfig,
        mut feed: SinkFeed,
    ) -> Result<Stream> {
        let reporter = feed.fault_reporter();
        let stream = device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                feed.fill(data);
            },
            move |err| reporter.report(err.to_string()),
            None,
        )?;
        Ok(stream)
    }

    /// Stream for devices without native f32 support; the feed writes into
    /// a scratch buffer that only grows
    fn build_converting_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut feed: SinkFeed,
    ) -> Result<Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let reporter = feed.fault_reporter();
        let mut scratch: Vec<f32> = Vec::new();
        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let scratch = &mut scratch[..data.len()];
                feed.fill(scratch);
                for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(*sample);
                }
            },
            move |err| reporter.report(err.to_string()),
            None,
        )?;
        Ok(stream)
    }
}

impl AudioSink for CpalSink {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn start(&mut self, feed: SinkFeed) -> retro_playback::Result<()> {
        let (reply, response) = bounded(1);
        self.command_tx
            .send(OutputCommand::Start { feed, reply })
            .map_err(|_| AudioOutputError::ThreadStopped)?;
        response
            .recv()
            .map_err(|_| AudioOutputError::ThreadStopped)??;
        Ok(())
    }

    fn stop(&mut self) {
        let _ = self.command_tx.send(OutputCommand::Stop);
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.command_tx.send(OutputCommand::Shutdown);
        if let Some(thread) = self.audio_thread.take() {
            if thread.join().is_err() {
                tracing::error!("Audio output thread panicked");
            }
        }
    }
}
