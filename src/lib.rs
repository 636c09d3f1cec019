//! Voicebox - speech capture and playback for chat assistants
//!
//! This library provides two independent audio subsystems:
//! - Background speech capture (microphone → STT → transcript buffer)
//! - Serialized speech playback (text jobs → synthesis → speakers)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Orchestrator                       │
//! │   chat events  │  timers  │  LLM responses          │
//! └──────────┬──────────────────────────┬───────────────┘
//!            │ start / stop_and_drain   │ submit / stop
//! ┌──────────▼──────────┐    ┌──────────▼───────────────┐
//! │   CaptureSession    │    │     PlaybackWorker        │
//! │ Listener → STT      │    │ queue → model → sink      │
//! └─────────────────────┘    └──────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use voice::{CaptureSession, PlaybackJob, PlaybackWorker, SubmitOutcome, Voice};
