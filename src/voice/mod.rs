//! Voice processing module
//!
//! Two independent subsystems share this module:
//! - capture: microphone → utterances → STT → transcript ([`CaptureSession`])
//! - playback: text jobs → synthesis → output device ([`PlaybackWorker`])

mod capture;
mod listener;
mod model;
mod piper;
mod playback;
mod segment;
mod session;
mod sink;
mod stt;
mod thread;
mod voices;

pub use capture::{AudioCapture, SAMPLE_RATE, rms, samples_to_wav};
pub use listener::{
    Listener, ListenerFactory, MIN_POLL_INTERVAL, MicrophoneConfig, MicrophoneFactory,
    MicrophoneListener,
};
pub use model::{AudioChunk, ChunkFormat, ChunkStream, ModelLoader, SpeechModel, VoiceModelCache};
pub use piper::{PiperLoader, PiperModel};
pub use playback::{
    DEFAULT_JOIN_TIMEOUT, PlaybackConfig, PlaybackJob, PlaybackWorker, SubmitOutcome, WorkerState,
};
pub use segment::{SegmenterConfig, SegmenterState, UtteranceSegmenter};
pub use session::{CaptureConfig, CaptureSession};
pub use sink::{AudioSink, DeviceSink, OutputStream, StreamGuard};
pub use stt::{Recognition, Recognizer, SpeechToText, SttProvider, Utterance};
pub use voices::Voice;
