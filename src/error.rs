//! Error types for voicebox

use std::time::Duration;

use thiserror::Error;

use crate::voice::Voice;

/// Result type alias for voicebox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the capture and playback subsystems
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Voice lifecycle error
    #[error("voice error: {0}")]
    Voice(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Synthesis model could not be loaded
    #[error("failed to load model for voice {voice}: {reason}")]
    ModelLoad { voice: Voice, reason: String },

    /// Synthesis failed partway through a job
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Output device rejected a chunk
    #[error("device write error: {0}")]
    DeviceWrite(String),

    /// Background thread did not exit in time
    #[error("{component} did not stop within {timeout:?}")]
    ShutdownTimeout {
        component: &'static str,
        timeout: Duration,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
