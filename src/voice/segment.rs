//! Utterance end-pointing
//!
//! Splits a continuous microphone stream into utterances using block energy:
//! an utterance starts on the first loud block and ends after a run of quiet
//! blocks. There is no upper bound on utterance length.

use crate::voice::capture::{SAMPLE_RATE, rms};

/// Ambient level multiplier applied during calibration
const CALIBRATION_RATIO: f32 = 1.5;

/// Segmenter thresholds
#[derive(Debug, Clone, Copy)]
pub struct SegmenterConfig {
    /// RMS energy above which a block counts as speech
    pub energy_threshold: f32,

    /// Voiced samples required for a segment to count as an utterance
    pub min_speech_samples: usize,

    /// Trailing quiet samples that end an utterance
    pub silence_samples: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            min_speech_samples: SAMPLE_RATE as usize * 3 / 10, // 0.3 seconds
            silence_samples: SAMPLE_RATE as usize * 8 / 10,    // 0.8 seconds
        }
    }
}

/// Where the segmenter is within the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Inside an utterance
    Speaking,
}

/// Accumulates audio blocks into utterances
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    state: SegmenterState,
    buffer: Vec<f32>,
    voiced: usize,
    silence: usize,
}

impl UtteranceSegmenter {
    #[must_use]
    pub const fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            state: SegmenterState::Idle,
            buffer: Vec::new(),
            voiced: 0,
            silence: 0,
        }
    }

    /// Feed one block of samples
    ///
    /// Returns the finished utterance once trailing silence closes it.
    pub fn push(&mut self, block: &[f32]) -> Option<Vec<f32>> {
        if block.is_empty() {
            return None;
        }

        let energy = rms(block);
        let is_speech = energy > self.config.energy_threshold;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(block);
                    self.voiced = block.len();
                    self.silence = 0;
                    tracing::trace!(energy, "speech started");
                }
                None
            }
            SegmenterState::Speaking => {
                self.buffer.extend_from_slice(block);
                if is_speech {
                    self.voiced += block.len();
                    self.silence = 0;
                } else {
                    self.silence += block.len();
                }

                if self.silence <= self.config.silence_samples {
                    return None;
                }

                if self.voiced < self.config.min_speech_samples {
                    tracing::trace!(voiced = self.voiced, "too short, discarding");
                    self.reset();
                    return None;
                }

                let utterance = std::mem::take(&mut self.buffer);
                tracing::debug!(samples = utterance.len(), "utterance complete");
                self.reset();
                Some(utterance)
            }
        }
    }

    /// Raise the speech threshold above the ambient noise in `ambient`
    pub fn calibrate(&mut self, ambient: &[f32]) {
        let level = rms(ambient) * CALIBRATION_RATIO;
        if level > self.config.energy_threshold {
            tracing::debug!(
                from = self.config.energy_threshold,
                to = level,
                "energy threshold raised for ambient noise"
            );
            self.config.energy_threshold = level;
        }
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.buffer.clear();
        self.voiced = 0;
        self.silence = 0;
    }

    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    #[must_use]
    pub const fn energy_threshold(&self) -> f32 {
        self.config.energy_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn tone(samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| 0.3 * (i as f32 * 0.17).sin())
            .collect()
    }

    fn silence(samples: usize) -> Vec<f32> {
        vec![0.0; samples]
    }

    const BLOCK: usize = 1600; // 100ms

    #[test]
    fn test_silence_stays_idle() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        for _ in 0..20 {
            assert!(seg.push(&silence(BLOCK)).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_speech_then_silence_completes() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());

        for _ in 0..5 {
            assert!(seg.push(&tone(BLOCK)).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Speaking);

        let mut done = None;
        for _ in 0..10 {
            if let Some(u) = seg.push(&silence(BLOCK)) {
                done = Some(u);
                break;
            }
        }

        let utterance = done.expect("utterance should complete after silence");
        assert!(utterance.len() >= 5 * BLOCK);
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_short_burst_is_discarded() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        seg.push(&tone(BLOCK));
        for _ in 0..10 {
            assert!(seg.push(&silence(BLOCK)).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn test_long_speech_has_no_limit() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        // 30 seconds of continuous speech never closes on its own
        for _ in 0..300 {
            assert!(seg.push(&tone(BLOCK)).is_none());
        }
        assert_eq!(seg.state(), SegmenterState::Speaking);
    }

    #[test]
    fn test_calibration_raises_threshold() {
        let mut seg = UtteranceSegmenter::new(SegmenterConfig::default());
        seg.calibrate(&vec![0.1; BLOCK]);
        assert!(seg.energy_threshold() > 0.1);

        // Quieter ambient never lowers it
        let raised = seg.energy_threshold();
        seg.calibrate(&silence(BLOCK));
        assert!((seg.energy_threshold() - raised).abs() < f32::EPSILON);
    }
}
