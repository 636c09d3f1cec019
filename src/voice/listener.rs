//! Utterance sources for the capture session

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::voice::capture::{AudioCapture, SAMPLE_RATE};
use crate::voice::segment::{SegmenterConfig, UtteranceSegmenter};
use crate::voice::stt::Utterance;
use crate::Result;

/// Produces utterances one at a time
///
/// Listeners live on the capture thread and need not be `Send`.
pub trait Listener {
    /// Block until the next utterance is complete
    ///
    /// Returns `Ok(None)` once `stop` is raised.
    ///
    /// # Errors
    ///
    /// Returns error if the audio source fails
    fn listen(&mut self, stop: &AtomicBool) -> Result<Option<Utterance>>;
}

/// Opens a listener on the thread that will use it
pub trait ListenerFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the audio source cannot be opened
    fn open(&self) -> Result<Box<dyn Listener>>;
}

/// Shortest allowed microphone polling interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Microphone listener tuning
#[derive(Debug, Clone)]
pub struct MicrophoneConfig {
    /// Input device name, or the host default
    pub device: Option<String>,

    /// End-pointing thresholds
    pub segmenter: SegmenterConfig,

    /// Ambient noise sampled before listening; zero disables calibration
    pub calibrate: Duration,

    /// How often captured audio is pulled from the device buffer; raised to
    /// [`MIN_POLL_INTERVAL`] when shorter
    pub poll_interval: Duration,
}

impl Default for MicrophoneConfig {
    fn default() -> Self {
        Self {
            device: None,
            segmenter: SegmenterConfig::default(),
            calibrate: Duration::ZERO,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Opens [`MicrophoneListener`]s
pub struct MicrophoneFactory {
    config: MicrophoneConfig,
}

impl MicrophoneFactory {
    #[must_use]
    pub const fn new(config: MicrophoneConfig) -> Self {
        Self { config }
    }
}

impl ListenerFactory for MicrophoneFactory {
    fn open(&self) -> Result<Box<dyn Listener>> {
        let mut capture = AudioCapture::new(self.config.device.as_deref())?;
        capture.start()?;

        let mut segmenter = UtteranceSegmenter::new(self.config.segmenter);

        if !self.config.calibrate.is_zero() {
            std::thread::sleep(self.config.calibrate);
            segmenter.calibrate(&capture.take_buffer());
            tracing::info!(
                threshold = segmenter.energy_threshold(),
                "calibrated for ambient noise"
            );
        }

        let (poll_interval, block_len) = polling(self.config.poll_interval);

        Ok(Box::new(MicrophoneListener {
            capture,
            segmenter,
            pending: Vec::new(),
            block_len,
            poll_interval,
        }))
    }
}

/// Effective poll interval and the number of samples it covers
fn polling(requested: Duration) -> (Duration, usize) {
    let interval = requested.max(MIN_POLL_INTERVAL);
    let block_len = u128::from(SAMPLE_RATE) * interval.as_millis() / 1000;
    (interval, usize::try_from(block_len).unwrap_or(usize::MAX))
}

/// Splits live microphone input into utterances
pub struct MicrophoneListener {
    capture: AudioCapture,
    segmenter: UtteranceSegmenter,
    /// Captured samples not yet fed to the segmenter
    pending: Vec<f32>,
    block_len: usize,
    poll_interval: Duration,
}

impl Listener for MicrophoneListener {
    fn listen(&mut self, stop: &AtomicBool) -> Result<Option<Utterance>> {
        // Audio captured while the previous utterance was being recognized
        // is still in the device buffer and counts toward this one
        let mut next_poll = Instant::now();

        loop {
            if stop.load(Ordering::Acquire) {
                self.segmenter.reset();
                self.pending.clear();
                return Ok(None);
            }

            self.pending.extend(self.capture.take_buffer());
            while self.pending.len() >= self.block_len {
                let block: Vec<f32> = self.pending.drain(..self.block_len).collect();
                if let Some(samples) = self.segmenter.push(&block) {
                    return Ok(Some(Utterance::new(samples, SAMPLE_RATE)));
                }
            }

            next_poll += self.poll_interval;
            if let Some(wait) = next_poll.checked_duration_since(Instant::now()) {
                std::thread::sleep(wait);
            } else {
                next_poll = Instant::now();
            }
        }
    }
}
