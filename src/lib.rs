//! Warden - webcam security monitor with voice-controlled guard mode
//!
//! This library provides the core functionality for the warden daemon:
//! - Frame capture (V4L2 camera, image replay, synthetic frames)
//! - Face recognition against an enrollment database
//! - Voice commands (guard on, guard off, quit)
//! - Guard-mode state machine with intruder debouncing and alerts
//! - Spoken challenge dialogue with unknown persons
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  latest frame  ┌──────────────────┐  latest result
//! │ camera thread├───────────────►│ recognition task ├──────┬──────────┐
//! └──────────────┘                └──────────────────┘      │          │
//!                                                           ▼          ▼
//! ┌──────────────┐   commands     ┌──────────────────┐  ┌─────────┐
//! │ listener     ├───────────────►│   guard loop     │  │ display │
//! │ operator keys│                │ (state machine)  │  └─────────┘
//! └──────┬───────┘                └────────┬─────────┘
//!        │ mic lease                       │ alert / session
//!        ▼                                 ▼
//! ┌───────────────────────────────────────────────────┐
//! │  Listen / Speak (mic + STT, TTS + speakers)       │
//! │  Chat responder (OpenAI-compatible or rules)      │
//! └───────────────────────────────────────────────────┘
//! ```

pub mod camera;
pub mod config;
pub mod console;
pub mod conversation;
pub mod daemon;
pub mod display;
pub mod error;
pub mod frame;
pub mod guard;
pub mod matcher;
pub mod recognition;
pub mod shutdown;
pub mod voice;

pub use config::Config;
pub use conversation::{ConversationManager, ConversationSession, SessionStatus};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use frame::{Frame, Region};
pub use guard::{GuardHandle, GuardService, GuardState};
pub use matcher::{FaceMatch, FaceMatcher, Identity};
pub use recognition::{RecognitionResult, RecognitionWorker, ResultReader};
pub use shutdown::{Shutdown, ShutdownTrigger};
