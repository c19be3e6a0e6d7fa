use std::path::PathBuf;

use serde::Deserialize;

use ostinato_types::{DEFAULT_TEMPO, DEFAULT_TRACKS, MAX_TEMPO, MAX_TRACKS, MIN_TEMPO, MIN_TRACKS};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    defaults: DefaultsConfig,
    #[serde(default)]
    midi: MidiConfig,
}

#[derive(Deserialize, Default)]
struct DefaultsConfig {
    tempo: Option<f64>,
    tracks: Option<usize>,
}

#[derive(Deserialize, Default)]
struct MidiConfig {
    clock_devices: Option<Vec<usize>>,
}

pub struct Config {
    defaults: DefaultsConfig,
    midi: MidiConfig,
}

impl Config {
    pub fn load() -> Self {
        let mut base: ConfigFile =
            toml::from_str(DEFAULT_CONFIG).expect("Failed to parse embedded config.toml");

        if let Some(path) = user_config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => {
                            merge_defaults(&mut base.defaults, user.defaults);
                            merge_midi(&mut base.midi, user.midi);
                        }
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            }
        }

        Config {
            defaults: base.defaults,
            midi: base.midi,
        }
    }

    /// Startup tempo; out-of-range values fall back to the default.
    pub fn default_tempo(&self) -> f64 {
        self.defaults
            .tempo
            .filter(|t| (MIN_TEMPO..=MAX_TEMPO).contains(t))
            .unwrap_or(DEFAULT_TEMPO)
    }

    /// Track count for an empty pattern (clamped to the legal range).
    pub fn default_tracks(&self) -> usize {
        self.defaults
            .tracks
            .unwrap_or(DEFAULT_TRACKS)
            .clamp(MIN_TRACKS, MAX_TRACKS)
    }

    /// Devices that receive the MIDI beat clock.
    pub fn clock_devices(&self) -> Vec<usize> {
        self.midi.clock_devices.clone().unwrap_or_else(|| vec![0])
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ostinato").join("config.toml"))
}

fn merge_defaults(base: &mut DefaultsConfig, user: DefaultsConfig) {
    if user.tempo.is_some() {
        base.tempo = user.tempo;
    }
    if user.tracks.is_some() {
        base.tracks = user.tracks;
    }
}

fn merge_midi(base: &mut MidiConfig, user: MidiConfig) {
    if user.clock_devices.is_some() {
        base.clock_devices = user.clock_devices;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let base: ConfigFile = toml::from_str(DEFAULT_CONFIG).unwrap();
        let config = Config {
            defaults: base.defaults,
            midi: base.midi,
        };
        assert_eq!(config.default_tempo(), 120.0);
        assert_eq!(config.default_tracks(), 4);
        assert_eq!(config.clock_devices(), vec![0]);
    }

    #[test]
    fn test_out_of_range_values_fall_back() {
        let user: ConfigFile =
            toml::from_str("[defaults]\ntempo = 500.0\ntracks = 99\n").unwrap();
        let config = Config {
            defaults: user.defaults,
            midi: MidiConfig::default(),
        };
        assert_eq!(config.default_tempo(), DEFAULT_TEMPO);
        assert_eq!(config.default_tracks(), MAX_TRACKS);
    }

    #[test]
    fn test_merge_keeps_base_when_unset() {
        let mut base: ConfigFile = toml::from_str(DEFAULT_CONFIG).unwrap();
        let user: ConfigFile = toml::from_str("[defaults]\ntempo = 90.0\n").unwrap();
        merge_defaults(&mut base.defaults, user.defaults);
        merge_midi(&mut base.midi, user.midi);
        let config = Config {
            defaults: base.defaults,
            midi: base.midi,
        };
        assert_eq!(config.default_tempo(), 90.0);
        assert_eq!(config.default_tracks(), 4);
    }
}
