//! Piper synthesis backend
//!
//! Runs the `piper` executable per job and streams its raw 16-bit mono
//! output as audio chunks while it is still synthesizing.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

use serde::Deserialize;

use crate::voice::model::{AudioChunk, ChunkFormat, ChunkStream, ModelLoader, SpeechModel};
use crate::{Error, Result};

/// Sample rate Piper uses when the model config does not say
const DEFAULT_SAMPLE_RATE: u32 = 22050;

/// Milliseconds of audio per emitted chunk
const CHUNK_MS: u32 = 100;

/// The parts of `<model>.onnx.json` we need
#[derive(Debug, Default, Deserialize)]
struct PiperModelConfig {
    #[serde(default)]
    audio: PiperAudioConfig,
}

#[derive(Debug, Deserialize)]
struct PiperAudioConfig {
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,
}

impl Default for PiperAudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

const fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

/// Loads Piper voices from `.onnx` assets
pub struct PiperLoader {
    binary: PathBuf,
}

impl PiperLoader {
    /// Create a loader using `binary`, or `piper` from `PATH` when unset
    ///
    /// # Errors
    ///
    /// Returns error if no piper executable can be found
    pub fn new(binary: Option<&Path>) -> Result<Self> {
        let binary = match binary {
            Some(path) => path.to_path_buf(),
            None => which::which("piper").map_err(|e| {
                Error::Config(format!("piper executable not found in PATH: {e}"))
            })?,
        };

        tracing::debug!(binary = %binary.display(), "piper loader initialized");
        Ok(Self { binary })
    }

    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl ModelLoader for PiperLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn SpeechModel>> {
        if !path.is_file() {
            return Err(Error::Tts(format!(
                "model asset not found: {}",
                path.display()
            )));
        }

        let config = read_model_config(path)?;
        tracing::debug!(
            path = %path.display(),
            sample_rate = config.audio.sample_rate,
            "piper model config loaded"
        );

        Ok(Arc::new(PiperModel {
            binary: self.binary.clone(),
            model: path.to_path_buf(),
            format: ChunkFormat {
                sample_rate: config.audio.sample_rate,
                channels: 1,
                sample_width: 2,
            },
        }))
    }
}

/// Read the JSON config that sits next to a Piper model
fn read_model_config(model: &Path) -> Result<PiperModelConfig> {
    let mut config_path = model.as_os_str().to_owned();
    config_path.push(".json");
    let config_path = PathBuf::from(config_path);

    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        Error::Tts(format!(
            "failed to read model config {}: {e}",
            config_path.display()
        ))
    })?;

    Ok(serde_json::from_str(&content)?)
}

/// A loaded Piper voice
pub struct PiperModel {
    binary: PathBuf,
    model: PathBuf,
    format: ChunkFormat,
}

impl PiperModel {
    #[must_use]
    pub const fn format(&self) -> ChunkFormat {
        self.format
    }
}

impl SpeechModel for PiperModel {
    fn synthesize(&self, text: &str) -> Result<ChunkStream<'_>> {
        let mut child = Command::new(&self.binary)
            .arg("--model")
            .arg(&self.model)
            .arg("--output-raw")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Synthesis(format!("failed to spawn piper: {e}")))?;

        // Piper treats each input line as one utterance
        let line = text.replace(['\r', '\n'], " ");
        if let Some(mut stdin) = child.stdin.take() {
            writeln!(stdin, "{line}")
                .map_err(|e| Error::Synthesis(format!("failed to send text to piper: {e}")))?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Synthesis("piper stdout unavailable".to_string()))?;

        let frame_bytes = usize::from(self.format.channels) * usize::from(self.format.sample_width);
        let frames = (self.format.sample_rate * CHUNK_MS / 1000) as usize;

        Ok(Box::new(PiperChunks {
            child,
            stdout,
            format: self.format,
            chunk_bytes: frames.max(1) * frame_bytes,
            frame_bytes,
            finished: false,
        }))
    }
}

/// Reads raw PCM from a running piper process
struct PiperChunks {
    child: Child,
    stdout: ChildStdout,
    format: ChunkFormat,
    chunk_bytes: usize,
    frame_bytes: usize,
    finished: bool,
}

impl PiperChunks {
    /// Fill up to one chunk, stopping early only at end of stream
    fn read_chunk(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.chunk_bytes];
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        // A trailing partial frame cannot be played
        filled -= filled % self.frame_bytes;
        buf.truncate(filled);
        Ok(buf)
    }

    fn finish(&mut self) -> Option<Result<AudioChunk>> {
        self.finished = true;
        match self.child.wait() {
            Ok(status) if status.success() => None,
            Ok(status) => Some(Err(Error::Synthesis(format!("piper exited with {status}")))),
            Err(e) => Some(Err(Error::Synthesis(format!("failed to wait for piper: {e}")))),
        }
    }
}

impl Iterator for PiperChunks {
    type Item = Result<AudioChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.read_chunk() {
            Ok(payload) if payload.is_empty() => self.finish(),
            Ok(payload) => Some(Ok(AudioChunk::new(self.format, payload))),
            Err(e) => {
                self.finished = true;
                let _ = self.child.kill();
                let _ = self.child.wait();
                Some(Err(Error::Synthesis(format!("failed to read piper output: {e}"))))
            }
        }
    }
}

impl Drop for PiperChunks {
    fn drop(&mut self) {
        if !self.finished {
            // Job abandoned mid-stream
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_config_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("en_US-ryan-high.onnx");
        std::fs::write(&model, b"onnx").unwrap();
        std::fs::write(
            dir.path().join("en_US-ryan-high.onnx.json"),
            r#"{"audio": {"sample_rate": 16000, "quality": "high"}, "num_speakers": 1}"#,
        )
        .unwrap();

        let config = read_model_config(&model).unwrap();
        assert_eq!(config.audio.sample_rate, 16000);
    }

    #[test]
    fn test_model_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("voice.onnx");
        std::fs::write(dir.path().join("voice.onnx.json"), "{}").unwrap();

        let config = read_model_config(&model).unwrap();
        assert_eq!(config.audio.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_missing_asset_fails() {
        let dir = tempfile::tempdir().unwrap();
        let loader = PiperLoader::new(Some(Path::new("/usr/bin/piper"))).unwrap();

        let result = loader.load(&dir.path().join("missing.onnx"));
        assert!(matches!(result, Err(Error::Tts(_))));
    }

    #[test]
    fn test_load_reads_format() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("voice.onnx");
        std::fs::write(&model, b"onnx").unwrap();
        std::fs::write(
            dir.path().join("voice.onnx.json"),
            r#"{"audio": {"sample_rate": 24000}}"#,
        )
        .unwrap();

        let loader = PiperLoader::new(Some(Path::new("/usr/bin/piper"))).unwrap();
        assert!(loader.load(&model).is_ok());

        let config = read_model_config(&model).unwrap();
        assert_eq!(config.audio.sample_rate, 24000);
    }
}
