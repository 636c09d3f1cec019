//! Synthesis models and the per-voice model cache

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::voice::Voice;
use crate::{Error, Result};

/// Sample layout shared by every chunk of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bytes per sample (2 = i16, 4 = i32)
    pub sample_width: u16,
}

/// One unit of synthesized audio, little-endian interleaved PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_width: u16,
    pub payload: Vec<u8>,
}

impl AudioChunk {
    /// Create a chunk from raw PCM bytes
    #[must_use]
    pub const fn new(format: ChunkFormat, payload: Vec<u8>) -> Self {
        Self {
            sample_rate: format.sample_rate,
            channels: format.channels,
            sample_width: format.sample_width,
            payload,
        }
    }

    /// Create a 16-bit chunk from samples
    #[must_use]
    pub fn from_i16(sample_rate: u32, channels: u16, samples: &[i16]) -> Self {
        let payload = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self {
            sample_rate,
            channels,
            sample_width: 2,
            payload,
        }
    }

    #[must_use]
    pub const fn format(&self) -> ChunkFormat {
        ChunkFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            sample_width: self.sample_width,
        }
    }

    /// Number of interleaved samples in the payload
    #[must_use]
    pub fn sample_count(&self) -> usize {
        match self.sample_width {
            0 => 0,
            w => self.payload.len() / usize::from(w),
        }
    }
}

/// Lazy, one-shot sequence of chunks for a single job
pub type ChunkStream<'a> = Box<dyn Iterator<Item = Result<AudioChunk>> + 'a>;

/// A loaded synthesis model
pub trait SpeechModel: Send + Sync {
    /// Start synthesizing `text`
    ///
    /// Chunks are produced progressively; an `Err` item ends the job.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis cannot be started
    fn synthesize(&self, text: &str) -> Result<ChunkStream<'_>>;
}

/// Loads a model from its asset file
pub trait ModelLoader: Send {
    /// Load the model stored at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the asset is missing or corrupt
    fn load(&self, path: &Path) -> Result<Arc<dyn SpeechModel>>;
}

/// Memoizes loaded models per voice
///
/// Owned by the playback worker thread, so lookups take `&mut self`
/// and need no locking.
pub struct VoiceModelCache {
    models_dir: PathBuf,
    loader: Box<dyn ModelLoader>,
    models: HashMap<Voice, Arc<dyn SpeechModel>>,
}

impl VoiceModelCache {
    /// Create an empty cache reading assets from `models_dir`
    pub fn new(models_dir: impl Into<PathBuf>, loader: Box<dyn ModelLoader>) -> Self {
        Self {
            models_dir: models_dir.into(),
            loader,
            models: HashMap::new(),
        }
    }

    /// Return the cached model for `voice`, loading it on first use
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] if loading fails; nothing is cached so a
    /// later call retries.
    pub fn get_or_load(&mut self, voice: Voice) -> Result<Arc<dyn SpeechModel>> {
        if let Some(model) = self.models.get(&voice) {
            return Ok(Arc::clone(model));
        }

        let path = self.asset_path(voice);
        tracing::info!(%voice, path = %path.display(), "loading voice model");

        let model = self.loader.load(&path).map_err(|e| Error::ModelLoad {
            voice,
            reason: e.to_string(),
        })?;

        self.models.insert(voice, Arc::clone(&model));
        Ok(model)
    }

    /// Path of the asset file for `voice`
    #[must_use]
    pub fn asset_path(&self, voice: Voice) -> PathBuf {
        self.models_dir.join(voice.asset_file())
    }

    #[must_use]
    pub fn is_loaded(&self, voice: Voice) -> bool {
        self.models.contains_key(&voice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Silent;

    impl SpeechModel for Silent {
        fn synthesize(&self, _text: &str) -> Result<ChunkStream<'_>> {
            Ok(Box::new(std::iter::empty()))
        }
    }

    /// Fails the first `fail_first` loads, then succeeds
    struct FlakyLoader {
        calls: Arc<AtomicUsize>,
        fail_first: usize,
    }

    impl ModelLoader for FlakyLoader {
        fn load(&self, path: &Path) -> Result<Arc<dyn SpeechModel>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    path.display().to_string(),
                )));
            }
            Ok(Arc::new(Silent))
        }
    }

    #[test]
    fn test_cache_loads_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = FlakyLoader {
            calls: Arc::clone(&calls),
            fail_first: 0,
        };
        let mut cache = VoiceModelCache::new("models", Box::new(loader));

        let a = cache.get_or_load(Voice::RyanMale).unwrap();
        let b = cache.get_or_load(Voice::RyanMale).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_loaded(Voice::RyanMale));
        assert!(!cache.is_loaded(Voice::HfcMale));
    }

    #[test]
    fn test_failed_load_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = FlakyLoader {
            calls: Arc::clone(&calls),
            fail_first: 1,
        };
        let mut cache = VoiceModelCache::new("models", Box::new(loader));

        let err = cache.get_or_load(Voice::HfcMale).err().unwrap();
        assert!(matches!(err, Error::ModelLoad { voice: Voice::HfcMale, .. }));
        assert!(cache.is_empty());

        cache.get_or_load(Voice::HfcMale).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_asset_path() {
        let cache = VoiceModelCache::new(
            "/opt/voices",
            Box::new(FlakyLoader {
                calls: Arc::new(AtomicUsize::new(0)),
                fail_first: 0,
            }),
        );
        assert_eq!(
            cache.asset_path(Voice::RyanMale),
            PathBuf::from("/opt/voices/en_US-ryan-high.onnx")
        );
    }

    #[test]
    fn test_chunk_sample_count() {
        let chunk = AudioChunk::from_i16(22050, 1, &[1, 2, 3]);
        assert_eq!(chunk.payload.len(), 6);
        assert_eq!(chunk.sample_count(), 3);
        assert_eq!(chunk.format().sample_width, 2);
    }
}
