//! Speech-to-text (STT) processing

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::voice::capture::samples_to_wav;
use crate::{Error, Result};

/// One captured utterance of mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Utterance {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Length of the utterance
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate.max(1)))
    }
}

/// Outcome of recognizing one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    /// Speech was understood
    Recognized(String),
    /// Audio could not be understood
    Ambiguous,
    /// The recognition service failed
    ServiceError(String),
}

impl Recognition {
    /// Classify a raw transcript; blank text means nothing was understood
    #[must_use]
    pub fn from_transcript(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            Self::Ambiguous
        } else {
            Self::Recognized(text.to_string())
        }
    }
}

/// Turns utterances into text
pub trait Recognizer: Send + Sync {
    fn recognize(&self, utterance: &Utterance) -> Recognition;
}

/// Response from OpenAI Whisper transcription API
#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttProvider {
    #[default]
    Whisper,
    Deepgram,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Transcribes speech through a hosted STT API
pub struct SpeechToText {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    language: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create an STT client for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new(
        provider: SttProvider,
        api_key: String,
        model: String,
        language: String,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(match provider {
                SttProvider::Whisper => "OpenAI API key required for Whisper".to_string(),
                SttProvider::Deepgram => "Deepgram API key required".to_string(),
            }));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            language,
            provider,
        })
    }

    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub fn transcribe(&self, audio: &[u8]) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio),
            SttProvider::Deepgram => self.transcribe_deepgram(audio),
        }
    }

    /// Transcribe using OpenAI Whisper
    fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::blocking::multipart::Form::new()
            .part(
                "file",
                reqwest::blocking::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json()?;
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&language={}&punctuate=true",
            self.model, self.language
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json()?;

        Ok(result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default())
    }
}

impl Recognizer for SpeechToText {
    fn recognize(&self, utterance: &Utterance) -> Recognition {
        let wav = match samples_to_wav(&utterance.samples, utterance.sample_rate) {
            Ok(wav) => wav,
            Err(e) => return Recognition::ServiceError(e.to_string()),
        };

        match self.transcribe(&wav) {
            Ok(text) => {
                let recognition = Recognition::from_transcript(&text);
                if let Recognition::Recognized(text) = &recognition {
                    tracing::info!(transcript = %text, "transcription complete");
                }
                recognition
            }
            Err(e) => Recognition::ServiceError(e.to_string()),
        }
    }
}
