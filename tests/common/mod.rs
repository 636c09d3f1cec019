//! Shared test utilities
//!
//! In-memory stand-ins for the audio devices, synthesis models and speech
//! recognizer, so the worker threads can be exercised without hardware.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use voicebox::voice::{
    AudioChunk, AudioSink, ChunkStream, Listener, ListenerFactory, ModelLoader, OutputStream,
    Recognition, Recognizer, SpeechModel, Utterance, Voice,
};
use voicebox::{Error, Result};

/// Sample rate of scripted chunks
pub const RATE: u32 = 22050;

/// Something observable that happened during playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Synth(String),
    Opened,
    Wrote(i16),
    Closed,
}

pub type Log = Arc<Mutex<Vec<Event>>>;

/// Blocks synthesis before chunk `at` until released
pub struct Pause {
    pub at: usize,
    pub reached: Sender<()>,
    pub release: Receiver<()>,
}

/// How a given text is synthesized
pub struct Plan {
    pub chunks: usize,
    pub fail_after: Option<usize>,
    pub pause: Option<Pause>,
}

impl Plan {
    pub const fn chunks(chunks: usize) -> Self {
        Self {
            chunks,
            fail_after: None,
            pause: None,
        }
    }
}

/// Handle for a paused job
pub struct PauseControl {
    pub reached: Receiver<()>,
    pub release: Sender<()>,
}

impl PauseControl {
    pub fn wait_reached(&self) {
        self.reached
            .recv_timeout(Duration::from_secs(5))
            .expect("job never reached its pause point");
    }

    pub fn release(&self) {
        self.release.send(()).expect("paused job went away");
    }
}

/// Scripted synthesis backend shared by every loaded voice
#[derive(Clone)]
pub struct Script {
    pub log: Log,
    plans: Arc<Mutex<HashMap<String, Plan>>>,
    failing: Arc<Mutex<HashSet<Voice>>>,
    panics: Arc<Mutex<HashSet<String>>>,
    sink_faults: Arc<Mutex<SinkFaults>>,
    pub loads: Arc<AtomicUsize>,
}

/// One-shot failures injected into the recording sink
#[derive(Default)]
struct SinkFaults {
    open: bool,
    write_at: Option<i16>,
}

impl Script {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            plans: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashSet::new())),
            panics: Arc::new(Mutex::new(HashSet::new())),
            sink_faults: Arc::new(Mutex::new(SinkFaults::default())),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn plan(&self, text: &str, plan: Plan) {
        self.plans.lock().insert(text.to_string(), plan);
    }

    /// Make `text` stop before its chunk `at` until released
    pub fn pause(&self, text: &str, chunks: usize, at: usize) -> PauseControl {
        let (reached_tx, reached_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        self.plan(
            text,
            Plan {
                chunks,
                fail_after: None,
                pause: Some(Pause {
                    at,
                    reached: reached_tx,
                    release: release_rx,
                }),
            },
        );
        PauseControl {
            reached: reached_rx,
            release: release_tx,
        }
    }

    pub fn fail_voice(&self, voice: Voice) {
        self.failing.lock().insert(voice);
    }

    /// Make synthesis of `text` panic partway through
    pub fn panic_on(&self, text: &str) {
        self.panics.lock().insert(text.to_string());
    }

    /// Make the next `open_for` fail
    pub fn fail_next_open(&self) {
        self.sink_faults.lock().open = true;
    }

    /// Make the next write of chunk `index` fail
    pub fn fail_next_write(&self, index: i16) {
        self.sink_faults.lock().write_at = Some(index);
    }

    pub fn loader(&self) -> Box<dyn ModelLoader> {
        Box::new(ScriptedLoader {
            script: self.clone(),
        })
    }

    pub fn sink(&self) -> Box<dyn AudioSink> {
        Box::new(RecordingSink {
            log: Arc::clone(&self.log),
            faults: Arc::clone(&self.sink_faults),
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }

    /// Texts that reached synthesis, in order
    pub fn spoken(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Synth(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }
}

struct ScriptedLoader {
    script: Script,
}

impl ModelLoader for ScriptedLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn SpeechModel>> {
        self.script.loads.fetch_add(1, Ordering::SeqCst);

        let failing = self.script.failing.lock();
        if failing.iter().any(|v| path.ends_with(v.asset_file())) {
            return Err(Error::Tts(format!("corrupt asset: {}", path.display())));
        }

        Ok(Arc::new(ScriptedModel {
            script: self.script.clone(),
        }))
    }
}

struct ScriptedModel {
    script: Script,
}

impl SpeechModel for ScriptedModel {
    fn synthesize(&self, text: &str) -> Result<ChunkStream<'_>> {
        self.script.log.lock().push(Event::Synth(text.to_string()));

        let mut plans = self.script.plans.lock();
        let (chunks, fail_after, pause) = match plans.remove(text) {
            Some(plan) => (plan.chunks, plan.fail_after, plan.pause),
            None => (3, None, None),
        };
        drop(plans);

        Ok(Box::new(ScriptedChunks {
            next: 0,
            chunks,
            fail_after,
            pause,
            panics: self.script.panics.lock().contains(text),
        }))
    }
}

struct ScriptedChunks {
    next: usize,
    chunks: usize,
    fail_after: Option<usize>,
    pause: Option<Pause>,
    panics: bool,
}

impl Iterator for ScriptedChunks {
    type Item = Result<AudioChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.chunks {
            return None;
        }

        if let Some(pause) = self.pause.as_ref().filter(|p| p.at == self.next) {
            let _ = pause.reached.send(());
            let _ = pause.release.recv();
        }

        if self.panics && self.next == 1 {
            panic!("model crashed mid-synthesis");
        }

        if self.fail_after == Some(self.next) {
            self.next = self.chunks;
            return Some(Err(Error::Synthesis("model blew up".to_string())));
        }

        let idx = i16::try_from(self.next).unwrap_or(i16::MAX);
        self.next += 1;
        Some(Ok(AudioChunk::from_i16(RATE, 1, &[idx])))
    }
}

struct RecordingSink {
    log: Log,
    faults: Arc<Mutex<SinkFaults>>,
}

impl AudioSink for RecordingSink {
    fn open_for(&mut self, first_chunk: &AudioChunk) -> Result<Box<dyn OutputStream>> {
        assert_eq!(first_chunk.sample_rate, RATE);
        if std::mem::take(&mut self.faults.lock().open) {
            return Err(Error::Audio("no output device available".to_string()));
        }
        self.log.lock().push(Event::Opened);
        Ok(Box::new(RecordingStream {
            log: Arc::clone(&self.log),
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct RecordingStream {
    log: Log,
    faults: Arc<Mutex<SinkFaults>>,
}

impl OutputStream for RecordingStream {
    fn write(&mut self, chunk: &AudioChunk) -> Result<()> {
        let value = i16::from_le_bytes([chunk.payload[0], chunk.payload[1]]);
        {
            let mut faults = self.faults.lock();
            if faults.write_at == Some(value) {
                faults.write_at = None;
                return Err(Error::DeviceWrite("underrun".to_string()));
            }
        }
        self.log.lock().push(Event::Wrote(value));
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.log.lock().push(Event::Closed);
        Ok(())
    }
}

/// One thing a scripted listener does when asked for an utterance
pub enum Step {
    /// Yield an utterance tagged with this id
    Utterance(usize),
    /// Fail this call
    Fail,
}

/// Scripted microphone shared across listening periods
#[derive(Clone)]
pub struct Mic {
    steps: Arc<Mutex<VecDeque<Step>>>,
    pub opens: Arc<AtomicUsize>,
    /// Listeners opened and not yet dropped
    pub live: Arc<AtomicUsize>,
    broken: Arc<AtomicBool>,
}

impl Mic {
    pub fn new() -> Self {
        Self {
            steps: Arc::new(Mutex::new(VecDeque::new())),
            opens: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            broken: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    pub fn break_device(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn factory(&self) -> Arc<dyn ListenerFactory> {
        Arc::new(self.clone())
    }
}

impl ListenerFactory for Mic {
    fn open(&self) -> Result<Box<dyn Listener>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(Error::Audio("no input device available".to_string()));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedListener {
            steps: Arc::clone(&self.steps),
            live: Arc::clone(&self.live),
        }))
    }
}

struct ScriptedListener {
    steps: Arc<Mutex<VecDeque<Step>>>,
    live: Arc<AtomicUsize>,
}

impl Drop for ScriptedListener {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Listener for ScriptedListener {
    fn listen(&mut self, stop: &AtomicBool) -> Result<Option<Utterance>> {
        loop {
            if stop.load(Ordering::Acquire) {
                return Ok(None);
            }
            let step = self.steps.lock().pop_front();
            match step {
                #[allow(clippy::cast_precision_loss)]
                Some(Step::Utterance(id)) => {
                    return Ok(Some(Utterance::new(vec![id as f32], 16000)));
                }
                Some(Step::Fail) => return Err(Error::Audio("buffer overrun".to_string())),
                None => std::thread::sleep(Duration::from_millis(5)),
            }
        }
    }
}

/// Recognizer answering by utterance id
pub struct Ears {
    responses: HashMap<usize, Recognition>,
    hold: Option<(usize, Sender<()>, Receiver<()>)>,
}

impl Ears {
    pub fn new(responses: Vec<(usize, Recognition)>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            hold: None,
        }
    }

    /// Block recognition of utterance `id` until released
    pub fn hold(mut self, id: usize) -> (Self, PauseControl) {
        let (reached_tx, reached_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        self.hold = Some((id, reached_tx, release_rx));
        (
            self,
            PauseControl {
                reached: reached_rx,
                release: release_tx,
            },
        )
    }
}

impl Recognizer for Ears {
    fn recognize(&self, utterance: &Utterance) -> Recognition {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let id = utterance.samples[0] as usize;

        if let Some((held, reached, release)) = &self.hold {
            if *held == id {
                let _ = reached.send(());
                let _ = release.recv();
            }
        }

        self.responses
            .get(&id)
            .cloned()
            .unwrap_or(Recognition::Ambiguous)
    }
}

/// Poll `cond` until it holds or five seconds pass
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
