//! Serialized speech playback
//!
//! A single consumer thread drains a FIFO of text jobs, renders each one
//! through its voice model and plays it to completion before taking the next.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;

use crate::voice::model::{ModelLoader, VoiceModelCache};
use crate::voice::sink::{AudioSink, StreamGuard};
use crate::voice::thread::{Joined, WorkerThread};
use crate::voice::Voice;
use crate::{Error, Result};

/// Default time allowed for the worker thread to exit
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Playback worker configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Directory holding one model asset per voice
    pub models_dir: PathBuf,

    /// Voice used by [`PlaybackWorker::speak`]
    pub default_voice: Voice,

    /// Maximum pending jobs; `None` leaves the queue unbounded
    pub max_queue: Option<usize>,

    /// How long `stop(true)` waits for the thread
    pub join_timeout: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("tts_voice_files"),
            default_voice: Voice::default(),
            max_queue: None,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}

/// One request to speak `text` with `voice`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackJob {
    pub voice: Voice,
    pub text: String,
}

/// Lifecycle of the consumer thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    Stopping,
}

/// What happened to a submitted job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Appended to the queue
    Queued,
    /// Appended after evicting the oldest pending job
    DroppedOldest(PlaybackJob),
    /// Not accepted because the worker is shutting down
    Rejected,
}

enum Command {
    Speak(PlaybackJob),
    Stop,
}

/// Everything the consumer thread owns while running
struct Renderer {
    cache: VoiceModelCache,
    sink: Box<dyn AudioSink>,
}

impl Renderer {
    fn play(&mut self, job: &PlaybackJob) {
        tracing::debug!(voice = %job.voice, text = %job.text, "playback job started");

        let rendered = panic::catch_unwind(AssertUnwindSafe(|| self.render(job)));

        match rendered {
            Ok(Ok(0)) => {
                tracing::debug!(voice = %job.voice, text = %job.text, "synthesis produced no audio");
            }
            Ok(Ok(chunks)) => {
                tracing::debug!(voice = %job.voice, chunks, "playback job complete");
            }
            Ok(Err(e)) => {
                tracing::error!(
                    voice = %job.voice,
                    text = %job.text,
                    error = %e,
                    "playback job failed"
                );
            }
            Err(payload) => {
                tracing::error!(
                    voice = %job.voice,
                    text = %job.text,
                    panic = panic_message(payload.as_ref()),
                    "playback job panicked"
                );
            }
        }
    }

    /// Render one job, returning the number of chunks played
    fn render(&mut self, job: &PlaybackJob) -> Result<usize> {
        let model = self.cache.get_or_load(job.voice)?;

        // Dropped on every exit path below, which closes the device stream
        let mut stream: Option<StreamGuard> = None;
        let mut played = 0;

        for chunk in model.synthesize(&job.text)? {
            let chunk = chunk?;

            if stream.is_none() {
                stream = Some(StreamGuard::new(self.sink.open_for(&chunk)?));
            }
            if let Some(out) = stream.as_mut() {
                out.write(&chunk)?;
            }
            played += 1;
        }

        if let Some(out) = stream {
            out.close();
        }

        Ok(played)
    }
}

struct Lifecycle {
    renderer: Option<Renderer>,
    thread: Option<WorkerThread<Renderer>>,
}

/// Single-threaded text-to-speech executor
///
/// Submissions never block by default: when the queue is full the oldest
/// pending job is dropped to keep speech fresh.
pub struct PlaybackWorker {
    config: PlaybackConfig,
    tx: Sender<Command>,
    rx: Receiver<Command>,
    state: Mutex<WorkerState>,
    lifecycle: Mutex<Lifecycle>,
}

impl PlaybackWorker {
    /// Create a stopped worker
    pub fn new(
        loader: Box<dyn ModelLoader>,
        sink: Box<dyn AudioSink>,
        config: PlaybackConfig,
    ) -> Self {
        let (tx, rx) = match config.max_queue {
            Some(depth) => crossbeam_channel::bounded(depth.max(1)),
            None => crossbeam_channel::unbounded(),
        };

        let renderer = Renderer {
            cache: VoiceModelCache::new(config.models_dir.clone(), loader),
            sink,
        };

        Self {
            config,
            tx,
            rx,
            state: Mutex::new(WorkerState::Stopped),
            lifecycle: Mutex::new(Lifecycle {
                renderer: Some(renderer),
                thread: None,
            }),
        }
    }

    /// Spawn the consumer thread; a no-op while already running
    ///
    /// # Errors
    ///
    /// Returns error if a previous thread is still shutting down or the
    /// thread cannot be spawned
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        self.reap(&mut lifecycle);

        match self.state() {
            WorkerState::Running => return Ok(()),
            WorkerState::Stopping => {
                return Err(Error::Voice(
                    "playback worker is still stopping".to_string(),
                ));
            }
            WorkerState::Stopped => {}
        }

        let renderer = lifecycle.renderer.take().ok_or_else(|| {
            Error::Voice("playback worker cannot restart after its thread was lost".to_string())
        })?;

        let rx = self.rx.clone();
        let thread = WorkerThread::spawn("tts-worker", move || consume(renderer, &rx))?;

        lifecycle.thread = Some(thread);
        *self.state.lock() = WorkerState::Running;
        Ok(())
    }

    /// Ask the worker to exit once the jobs already queued have played
    ///
    /// With `wait`, blocks up to the configured join timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if the thread is still busy after
    /// the timeout; it keeps running and will exit on its own.
    pub fn stop(&self, wait: bool) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        self.reap(&mut lifecycle);

        match self.state() {
            WorkerState::Stopped => return Ok(()),
            WorkerState::Running => {
                *self.state.lock() = WorkerState::Stopping;
                self.enqueue_stop();
            }
            WorkerState::Stopping => {}
        }

        if !wait {
            return Ok(());
        }

        let Some(thread) = lifecycle.thread.take() else {
            *self.state.lock() = WorkerState::Stopped;
            return Ok(());
        };

        match thread.join_timeout(self.config.join_timeout) {
            Joined::Finished(renderer) => {
                lifecycle.renderer = Some(renderer);
                *self.state.lock() = WorkerState::Stopped;
                tracing::info!("playback worker stopped");
                Ok(())
            }
            Joined::Panicked => {
                *self.state.lock() = WorkerState::Stopped;
                tracing::error!("playback worker thread panicked");
                Ok(())
            }
            Joined::TimedOut(thread) => {
                lifecycle.thread = Some(thread);
                tracing::warn!(
                    timeout = ?self.config.join_timeout,
                    "playback worker did not stop in time"
                );
                Err(Error::ShutdownTimeout {
                    component: "playback worker",
                    timeout: self.config.join_timeout,
                })
            }
        }
    }

    /// Queue `text` for playback with `voice`
    ///
    /// When the queue is full, `drop_if_full` evicts the oldest pending job;
    /// otherwise the call blocks until there is room.
    pub fn submit(&self, voice: Voice, text: impl Into<String>, drop_if_full: bool) -> SubmitOutcome {
        let job = PlaybackJob {
            voice,
            text: text.into(),
        };

        if self.state() == WorkerState::Stopping {
            tracing::warn!(voice = %job.voice, text = %job.text, "worker stopping, job rejected");
            return SubmitOutcome::Rejected;
        }

        match self.tx.try_send(Command::Speak(job)) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(cmd)) if drop_if_full => self.replace_oldest(cmd),
            Err(TrySendError::Full(cmd)) => {
                tracing::debug!("queue full, waiting for room");
                match self.tx.send(cmd) {
                    Ok(()) => SubmitOutcome::Queued,
                    Err(_) => SubmitOutcome::Rejected,
                }
            }
            Err(TrySendError::Disconnected(_)) => SubmitOutcome::Rejected,
        }
    }

    /// Queue `text` with the default voice, dropping the oldest job if full
    pub fn speak(&self, text: impl Into<String>) -> SubmitOutcome {
        self.submit(self.config.default_voice, text, true)
    }

    /// Drop every job that has not started playing
    ///
    /// The job currently playing is not interrupted. Returns how many jobs
    /// were removed.
    pub fn clear_pending(&self) -> usize {
        let mut cleared = 0;
        let mut saw_stop = false;

        loop {
            match self.rx.try_recv() {
                Ok(Command::Speak(_)) => cleared += 1,
                Ok(Command::Stop) => saw_stop = true,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        if saw_stop {
            self.requeue_stop();
        }

        if cleared > 0 {
            tracing::debug!(cleared, "pending playback jobs cleared");
        }
        cleared
    }

    /// Number of jobs waiting to play
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    #[must_use]
    pub const fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Evict the oldest pending job to make room for `cmd`
    fn replace_oldest(&self, mut cmd: Command) -> SubmitOutcome {
        let mut evicted = None;

        loop {
            match self.rx.try_recv() {
                Ok(Command::Speak(old)) => {
                    tracing::debug!(voice = %old.voice, text = %old.text, "queue full, dropping oldest job");
                    if evicted.is_none() {
                        evicted = Some(old);
                    }
                }
                Ok(Command::Stop) => {
                    // Shutdown raced this submission; the sentinel wins
                    self.requeue_stop();
                    return SubmitOutcome::Rejected;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
            }

            match self.tx.try_send(cmd) {
                Ok(()) => {
                    return evicted.map_or(SubmitOutcome::Queued, SubmitOutcome::DroppedOldest);
                }
                Err(TrySendError::Full(back)) => cmd = back,
                Err(TrySendError::Disconnected(_)) => return SubmitOutcome::Rejected,
            }
        }
    }

    /// Append the stop sentinel behind pending jobs without blocking
    ///
    /// A full queue is cleared to make room for the sentinel.
    fn enqueue_stop(&self) {
        let mut cmd = Command::Stop;
        loop {
            match self.tx.try_send(cmd) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(back)) => {
                    let dropped = self.clear_pending();
                    tracing::warn!(dropped, "queue full, pending jobs dropped for shutdown");
                    cmd = back;
                }
            }
        }
    }

    fn requeue_stop(&self) {
        if self.tx.try_send(Command::Stop).is_err() {
            tracing::warn!("failed to requeue stop signal");
        }
    }

    /// Collect a thread that has exited since `stop(false)`
    fn reap(&self, lifecycle: &mut Lifecycle) {
        if self.state() != WorkerState::Stopping {
            return;
        }
        if !lifecycle.thread.as_ref().is_some_and(WorkerThread::is_finished) {
            return;
        }

        if let Some(thread) = lifecycle.thread.take() {
            match thread.join_timeout(Duration::ZERO) {
                Joined::Finished(renderer) => lifecycle.renderer = Some(renderer),
                Joined::Panicked => tracing::error!("playback worker thread panicked"),
                Joined::TimedOut(thread) => {
                    lifecycle.thread = Some(thread);
                    return;
                }
            }
        }
        *self.state.lock() = WorkerState::Stopped;
    }
}

impl Drop for PlaybackWorker {
    fn drop(&mut self) {
        if self.state() == WorkerState::Stopped {
            return;
        }
        if let Err(e) = self.stop(true) {
            tracing::warn!(error = %e, "playback worker dropped while busy");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Consumer loop run on the worker thread
fn consume(mut renderer: Renderer, rx: &Receiver<Command>) -> Renderer {
    tracing::info!("playback worker started");

    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Speak(job) => renderer.play(&job),
            Command::Stop => break,
        }
    }

    tracing::info!("playback worker stopping");
    renderer
}
