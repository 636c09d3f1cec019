//! Background speech capture
//!
//! A capture session owns one thread per listening period. The thread pulls
//! utterances from a [`Listener`], recognizes each one and appends the text to
//! a transcript that the orchestrator drains with
//! [`CaptureSession::stop_and_drain`].
//!
//! Draining waits (up to the join timeout) for an utterance that is already
//! being recognized, so its text is included. Audio that has not yet formed a
//! complete utterance when stop is requested is dropped, as is any text that
//! arrives after the timeout expires. A thread that misses the timeout is
//! kept, and the next `start` waits for it instead of opening a second input.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::voice::listener::ListenerFactory;
use crate::voice::stt::{Recognition, Recognizer};
use crate::voice::thread::{Joined, WorkerThread};
use crate::{Error, Result};

/// Capture session configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// How long `stop_and_drain` waits for the capture thread
    pub join_timeout: Duration,

    /// How long `start` waits for the listener to open
    pub open_timeout: Duration,

    /// Pause after a listener error before listening again
    pub retry_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_secs(5),
            open_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Default)]
struct Transcript {
    fragments: Vec<String>,
    sealed: bool,
}

/// State shared with the capture thread for one listening period
#[derive(Default)]
struct Period {
    stop: AtomicBool,
    transcript: Mutex<Transcript>,
}

impl Period {
    fn append(&self, text: String) {
        let mut transcript = self.transcript.lock();
        if transcript.sealed {
            tracing::debug!(text = %text, "transcript already drained, dropping late text");
            return;
        }
        transcript.fragments.push(text);
    }

    fn snapshot(&self) -> String {
        self.transcript.lock().fragments.join(" ")
    }

    /// Take the text and refuse anything appended afterwards
    fn drain(&self) -> String {
        let mut transcript = self.transcript.lock();
        transcript.sealed = true;
        std::mem::take(&mut transcript.fragments).join(" ")
    }
}

struct Active {
    period: Arc<Period>,
    thread: WorkerThread<()>,
}

#[derive(Default)]
struct Slots {
    active: Option<Active>,
    /// A stopped capture thread that outlived its join timeout
    lingering: Option<WorkerThread<()>>,
}

/// Continuously transcribes microphone audio while listening
///
/// At most one capture thread exists per session: a thread that misses its
/// join timeout is kept and must exit before the next `start` succeeds.
pub struct CaptureSession {
    factory: Arc<dyn ListenerFactory>,
    recognizer: Arc<dyn Recognizer>,
    config: CaptureConfig,
    slots: Mutex<Slots>,
}

impl CaptureSession {
    /// Create an idle session
    pub fn new(
        factory: Arc<dyn ListenerFactory>,
        recognizer: Arc<dyn Recognizer>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            factory,
            recognizer,
            config,
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Start listening with an empty transcript
    ///
    /// Calling this while already listening does nothing. If the previous
    /// capture thread is still finishing, waits up to the join timeout for it.
    ///
    /// # Errors
    ///
    /// Returns error if the previous thread is still running, the capture
    /// thread cannot be spawned or the listener fails to open; the session
    /// stays idle.
    pub fn start(&self) -> Result<()> {
        let mut slots = self.slots.lock();
        if slots.active.is_some() {
            tracing::debug!("already listening");
            return Ok(());
        }

        if let Some(thread) = slots.lingering.take() {
            tracing::debug!("waiting for previous capture thread");
            if !self.settle(&mut slots, thread) {
                return Err(Error::Voice(
                    "previous capture thread is still stopping".to_string(),
                ));
            }
        }

        let period = Arc::new(Period::default());
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        let thread = {
            let factory = Arc::clone(&self.factory);
            let recognizer = Arc::clone(&self.recognizer);
            let period = Arc::clone(&period);
            let retry_delay = self.config.retry_delay;
            WorkerThread::spawn("speech-capture", move || {
                capture_loop(factory.as_ref(), recognizer.as_ref(), &period, &ready_tx, retry_delay);
            })?
        };

        match ready_rx.recv_timeout(self.config.open_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if !self.settle(&mut slots, thread) {
                    tracing::warn!("capture thread slow to exit after failed open");
                }
                return Err(e);
            }
            Err(_) => {
                period.stop.store(true, Ordering::Release);
                if !self.settle(&mut slots, thread) {
                    tracing::warn!("capture thread still opening audio input");
                }
                return Err(Error::Audio("timed out opening audio input".to_string()));
            }
        }

        slots.active = Some(Active { period, thread });
        tracing::info!("listening");
        Ok(())
    }

    /// Stop listening and return everything recognized since `start`
    ///
    /// Returns an empty string if the session was not listening.
    pub fn stop_and_drain(&self) -> String {
        let mut slots = self.slots.lock();
        let Some(Active { period, thread }) = slots.active.take() else {
            tracing::info!("stop requested but nothing was listening");
            return String::new();
        };

        period.stop.store(true, Ordering::Release);

        if !self.settle(&mut slots, thread) {
            tracing::warn!(
                timeout = ?self.config.join_timeout,
                "capture thread still busy, in-flight utterance discarded"
            );
        }

        let text = period.drain();
        drop(slots);

        tracing::info!(chars = text.len(), "stopped listening");
        text
    }

    /// Read the transcript so far without clearing it
    #[must_use]
    pub fn transcript_snapshot(&self) -> String {
        self.slots
            .lock()
            .active
            .as_ref()
            .map(|a| a.period.snapshot())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.slots.lock().active.is_some()
    }

    /// Join a stopping capture thread, keeping it if it outlives the timeout
    ///
    /// Returns whether the thread has exited.
    fn settle(&self, slots: &mut Slots, thread: WorkerThread<()>) -> bool {
        match thread.join_timeout(self.config.join_timeout) {
            Joined::Finished(()) => true,
            Joined::Panicked => {
                tracing::error!("capture thread panicked");
                true
            }
            Joined::TimedOut(thread) => {
                slots.lingering = Some(thread);
                false
            }
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.is_listening() {
            let _ = self.stop_and_drain();
        }
    }
}

/// Body of the capture thread
fn capture_loop(
    factory: &dyn ListenerFactory,
    recognizer: &dyn Recognizer,
    period: &Period,
    ready: &Sender<Result<()>>,
    retry_delay: Duration,
) {
    let mut listener = match factory.open() {
        Ok(listener) => {
            let _ = ready.send(Ok(()));
            listener
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to open audio input");
            let _ = ready.send(Err(e));
            return;
        }
    };

    while !period.stop.load(Ordering::Acquire) {
        let utterance = match listener.listen(&period.stop) {
            Ok(Some(utterance)) => utterance,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "listening failed, retrying");
                std::thread::sleep(retry_delay);
                continue;
            }
        };

        tracing::debug!(duration = ?utterance.duration(), "utterance captured");

        match recognizer.recognize(&utterance) {
            Recognition::Recognized(text) => {
                tracing::debug!(text = %text, "utterance recognized");
                period.append(text);
            }
            Recognition::Ambiguous => {
                tracing::info!("could not understand audio");
            }
            Recognition::ServiceError(detail) => {
                tracing::warn!(error = %detail, "recognition service failed");
            }
        }
    }

    tracing::debug!("capture loop exiting");
}
