/// Retro Player - headless command-line player
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use retro_audio::AudioFormat;
use retro_audio_desktop::CpalSink;
use retro_playback::{AudioSink, NullSink, PlaybackState, Player, RepeatMode};
use std::path::PathBuf;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod display;
mod settings;

use display::Printer;
use settings::Overrides;

#[derive(Parser)]
#[command(name = "retro")]
#[command(about = "Retro Player command-line audio player", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play files as a playlist
    Play(PlayArgs),
    /// List audio output devices
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// List supported file formats
    Formats,
}

#[derive(clap::Args)]
struct PlayArgs {
    /// Audio files, played in order
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Configuration file path (defaults to ./retro.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output device name (see `retro devices`)
    #[arg(short, long, conflicts_with = "null_sink")]
    device: Option<String>,

    /// Pull audio in real time without a device
    #[arg(long)]
    null_sink: bool,

    /// Bass gain in dB (-12 to 12)
    #[arg(long, allow_negative_numbers = true)]
    bass: Option<f32>,

    /// Mid gain in dB (-12 to 12)
    #[arg(long, allow_negative_numbers = true)]
    mid: Option<f32>,

    /// Treble gain in dB (-12 to 12)
    #[arg(long, allow_negative_numbers = true)]
    treble: Option<f32>,

    /// Volume (0-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    volume: Option<u8>,

    /// Crossfade on next/previous in milliseconds (0 = off)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=10_000))]
    crossfade: Option<u64>,

    /// Shuffle the playlist
    #[arg(long)]
    shuffle: bool,

    /// Repeat mode: off, all, one
    #[arg(long)]
    repeat: Option<RepeatMode>,

    /// Print one JSON object per update instead of a status line
    #[arg(long)]
    json: bool,
}

impl PlayArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            bass: self.bass,
            mid: self.mid,
            treble: self.treble,
            volume: self.volume,
            crossfade_ms: self.crossfade,
            shuffle: self.shuffle,
            repeat: self.repeat,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "retro=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play(args) => play(&args)?,
        Commands::Devices { json } => devices(json)?,
        Commands::Formats => formats(),
    }

    Ok(())
}

fn play(args: &PlayArgs) -> anyhow::Result<()> {
    let mut config = settings::load(args.config.as_deref())?;
    args.overrides().apply(&mut config);
    config.validate()?;

    let sink: Box<dyn AudioSink> = if args.null_sink {
        Box::new(NullSink::new(config.playback.stream_spec()?))
    } else {
        let sink = match &args.device {
            Some(name) => CpalSink::with_device(name)?,
            None => CpalSink::new().context("No usable output device (try --null-sink)")?,
        };
        Box::new(sink)
    };

    let refresh = config.spectrum.refresh_interval();
    let player = Player::new(config, sink)?;

    let added = player.enqueue(&args.files)?;
    if added == 0 {
        bail!("None of the {} files can be played", args.files.len());
    }
    tracing::info!("Playlist: {} of {} files", added, args.files.len());

    player.play()?;

    let mut printer = Printer::new(args.json);
    loop {
        thread::sleep(refresh);
        let status = player.status();
        printer.update(&status, player.spectrum().as_ref())?;
        if status.state == PlaybackState::Stopped {
            break;
        }
    }
    printer.finish()?;

    player.shutdown();
    Ok(())
}

fn devices(json: bool) -> anyhow::Result<()> {
    let devices = retro_audio_desktop::list_devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No output devices found");
    }
    for device in devices {
        println!(
            "{} {}  ({} Hz, {} ch, {})",
            if device.is_default { "*" } else { " " },
            device.name,
            device.sample_rate,
            device.channels,
            device.sample_format
        );
    }
    Ok(())
}

fn formats() {
    for format in AudioFormat::ALL {
        if format.is_decodable() {
            println!("{}", format);
        } else {
            println!("{} (listed, no decoder)", format);
        }
    }
}
