//! Configuration management for voicebox
//!
//! Precedence, lowest to highest: built-in defaults, the TOML config file,
//! environment variables, then command line flags (applied by the binary).

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::voice::{
    CaptureConfig, MicrophoneConfig, PlaybackConfig, SAMPLE_RATE, SpeechToText, SttProvider, Voice,
};
use crate::{Error, Result};

use file::VoiceboxConfigFile;

/// Complete runtime configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Playback worker settings
    pub playback: PlaybackConfig,

    /// Piper executable; looked up on `PATH` when unset
    pub piper_bin: Option<PathBuf>,

    /// Output device name; host default when unset
    pub output_device: Option<String>,

    /// Capture session settings
    pub capture: CaptureConfig,

    /// Microphone listener settings
    pub microphone: MicrophoneConfig,

    /// Speech recognition settings
    pub stt: SttConfig,
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Hosted STT backend
    pub provider: SttProvider,

    /// Provider model identifier
    pub model: String,

    /// Spoken language code
    pub language: String,

    /// Provider API key
    pub api_key: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: SttProvider::Whisper,
            model: "whisper-1".to_string(),
            language: "en".to_string(),
            api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from the config file and process environment
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a voice, provider or number cannot be parsed
    pub fn resolve(
        fc: VoiceboxConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::default();

        // Playback
        let pb = fc.playback;
        if let Some(dir) = env("VOICEBOX_MODELS_DIR").or(pb.models_dir) {
            config.playback.models_dir = PathBuf::from(dir);
        }
        if let Some(voice) = env("VOICEBOX_VOICE").or(pb.default_voice) {
            config.playback.default_voice = voice.parse::<Voice>()?;
        }
        config.playback.max_queue = match env("VOICEBOX_MAX_QUEUE") {
            Some(raw) => Some(parse_number("VOICEBOX_MAX_QUEUE", &raw)?),
            None => pb.max_queue,
        };
        if let Some(secs) = pb.join_timeout_secs {
            config.playback.join_timeout = Duration::from_secs(secs);
        }
        config.piper_bin = env("VOICEBOX_PIPER_BIN").or(pb.piper_bin).map(PathBuf::from);
        config.output_device = pb.output_device;

        // Capture
        let cap = fc.capture;
        if let Some(threshold) = cap.energy_threshold {
            config.microphone.segmenter.energy_threshold = threshold;
        }
        if let Some(ms) = cap.min_speech_ms {
            config.microphone.segmenter.min_speech_samples = ms_to_samples(ms);
        }
        if let Some(ms) = cap.silence_ms {
            config.microphone.segmenter.silence_samples = ms_to_samples(ms);
        }
        if let Some(ms) = cap.calibrate_ms {
            config.microphone.calibrate = Duration::from_millis(ms);
        }
        if let Some(ms) = cap.poll_interval_ms {
            config.microphone.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = cap.join_timeout_secs {
            config.capture.join_timeout = Duration::from_secs(secs);
        }
        config.microphone.device = cap.input_device;

        // STT
        let stt = fc.stt;
        if let Some(provider) = env("VOICEBOX_STT_PROVIDER").or(stt.provider) {
            config.stt.provider = provider.parse()?;
        }
        match env("VOICEBOX_STT_MODEL").or(stt.model) {
            Some(model) => config.stt.model = model,
            None if config.stt.provider == SttProvider::Deepgram => {
                config.stt.model = "nova-2".to_string();
            }
            None => {}
        }
        if let Some(language) = stt.language {
            config.stt.language = language;
        }
        let key_var = match config.stt.provider {
            SttProvider::Whisper => "OPENAI_API_KEY",
            SttProvider::Deepgram => "DEEPGRAM_API_KEY",
        };
        config.stt.api_key = env(key_var).or(stt.api_key);

        Ok(config)
    }

    /// Build the configured speech recognizer
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn recognizer(&self) -> Result<SpeechToText> {
        SpeechToText::new(
            self.stt.provider,
            self.stt.api_key.clone().unwrap_or_default(),
            self.stt.model.clone(),
            self.stt.language.clone(),
        )
    }
}

fn ms_to_samples(ms: u64) -> usize {
    usize::try_from(u64::from(SAMPLE_RATE) * ms / 1000).unwrap_or(usize::MAX)
}

fn parse_number(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name} must be a number: {e}")))
}
