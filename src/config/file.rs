//! TOML configuration file loading
//!
//! Supports `~/.config/voicebox/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceboxConfigFile {
    /// Speech playback configuration
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// Microphone capture configuration
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Speech recognition configuration
    #[serde(default)]
    pub stt: SttFileConfig,
}

/// Playback worker configuration
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    /// Directory holding the voice model assets
    pub models_dir: Option<String>,

    /// Voice used when none is given (e.g. "norman-male")
    pub default_voice: Option<String>,

    /// Maximum pending jobs; omit for unbounded
    pub max_queue: Option<usize>,

    /// Seconds to wait for the worker thread on stop
    pub join_timeout_secs: Option<u64>,

    /// Path to the piper executable
    pub piper_bin: Option<String>,

    /// Output device name
    pub output_device: Option<String>,
}

/// Capture session configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// RMS energy that counts as speech
    pub energy_threshold: Option<f32>,

    /// Minimum voiced audio per utterance
    pub min_speech_ms: Option<u64>,

    /// Trailing silence that ends an utterance
    pub silence_ms: Option<u64>,

    /// Ambient noise calibration period; 0 disables
    pub calibrate_ms: Option<u64>,

    /// Microphone polling interval
    pub poll_interval_ms: Option<u64>,

    /// Seconds to wait for the capture thread on stop
    pub join_timeout_secs: Option<u64>,

    /// Input device name
    pub input_device: Option<String>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,

    /// Provider model (e.g. "whisper-1", "nova-2")
    pub model: Option<String>,

    /// Spoken language code (e.g. "en")
    pub language: Option<String>,

    /// Provider API key
    pub api_key: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceboxConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceboxConfigFile {
    config_file_path().map_or_else(VoiceboxConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_from(path: &Path) -> VoiceboxConfigFile {
    if !path.exists() {
        return VoiceboxConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceboxConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceboxConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voicebox/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voicebox").join("config.toml"))
}
