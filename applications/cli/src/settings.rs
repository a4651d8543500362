/// Player configuration loading for the command line
use anyhow::{Context, Result};
use retro_audio::EqualizerState;
use retro_playback::{PlayerConfig, RepeatMode};
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is not
/// given
const DEFAULT_CONFIG_FILE: &str = "retro.toml";

/// Load configuration from file and environment.
///
/// Sources, later ones winning: built-in defaults, the TOML file (`path`,
/// or `retro.toml` if it exists), then `RETRO_`-prefixed environment
/// variables with `__` between section and key, e.g.
/// `RETRO_PLAYBACK__VOLUME=60` or `RETRO_SPECTRUM__BARS=32`.
pub fn load(path: Option<&Path>) -> Result<PlayerConfig> {
    let mut settings = config::Config::builder();

    match path {
        Some(path) => {
            settings = settings.add_source(config::File::from(path.to_path_buf()));
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                settings = settings.add_source(config::File::from(default_path));
            }
        }
    }

    // Override with environment variables (prefixed with RETRO_)
    settings = settings.add_source(
        config::Environment::with_prefix("RETRO")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config: PlayerConfig = settings
        .build()
        .context("Failed to read configuration")?
        .try_deserialize()
        .context("Invalid configuration")?;
    Ok(config)
}

/// Settings given on the command line, applied over the loaded config
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bass: Option<f32>,
    pub mid: Option<f32>,
    pub treble: Option<f32>,
    pub volume: Option<u8>,
    pub crossfade_ms: Option<u64>,
    pub shuffle: bool,
    pub repeat: Option<RepeatMode>,
}

impl Overrides {
    pub fn apply(&self, config: &mut PlayerConfig) {
        let eq = config.equalizer;
        config.equalizer = EqualizerState::new(
            self.bass.unwrap_or(eq.bass),
            self.mid.unwrap_or(eq.mid),
            self.treble.unwrap_or(eq.treble),
        );
        if let Some(volume) = self.volume {
            config.playback.volume = volume;
        }
        if let Some(crossfade_ms) = self.crossfade_ms {
            config.playback.crossfade_ms = crossfade_ms;
        }
        if self.shuffle {
            config.playback.shuffle = true;
        }
        if let Some(repeat) = self.repeat {
            config.playback.repeat = repeat;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(
            r#"
            [playback]
            volume = 55
            crossfade_ms = 2000
            repeat = "all"

            [equalizer]
            bass = 4.5
            "#,
        );

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.playback.volume, 55);
        assert_eq!(config.playback.crossfade_ms, 2000);
        assert_eq!(config.playback.repeat, RepeatMode::All);
        assert_eq!(config.playback.queue_ms, PlayerConfig::default().playback.queue_ms);
        assert_eq!(config.equalizer.bass, 4.5);
        assert_eq!(config.equalizer.treble, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_overrides_file() {
        let file = write_config("[spectrum]\nbars = 16\n");
        std::env::set_var("RETRO_SPECTRUM__REFRESH_HZ", "20");

        let config = load(Some(file.path())).unwrap();
        std::env::remove_var("RETRO_SPECTRUM__REFRESH_HZ");

        assert_eq!(config.spectrum.bars, 16);
        assert_eq!(config.spectrum.refresh_hz, 20);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load(Some(Path::new("/definitely/not/here.toml"))).is_err());
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        let file = write_config("[playback]\nqueue_ms = 1\n");
        let config = load(Some(file.path())).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn overrides_win_and_clamp() {
        let mut config = PlayerConfig::default();
        config.equalizer = EqualizerState::new(3.0, 2.0, 1.0);

        Overrides {
            bass: Some(30.0),
            treble: Some(-6.0),
            volume: Some(40),
            crossfade_ms: Some(1_500),
            repeat: Some(RepeatMode::One),
            ..Overrides::default()
        }
        .apply(&mut config);

        assert_eq!(config.equalizer, EqualizerState::new(12.0, 2.0, -6.0));
        assert_eq!(config.playback.volume, 40);
        assert_eq!(config.playback.crossfade_ms, 1_500);
        assert_eq!(config.playback.repeat, RepeatMode::One);
        assert!(!config.playback.shuffle);
    }
}
