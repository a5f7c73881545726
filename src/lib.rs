//! Parley - voice conversation practice with a chat assistant
//!
//! One turn at a time: the user's speech is transcribed, sent to a chat
//! service, and the reply is spoken back through a neural voice with the
//! system synthesizer as fallback.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   transcript   ┌──────────────────┐   messages   ┌─────────────┐
//! │ SpeechInput  ├───────────────►│ TurnOrchestrator ├─────────────►│ ChatService │
//! └──────────────┘                └────────┬─────────┘              └─────────────┘
//!                                          │ reply
//!                      ┌───────────────────┼────────────────────┐
//!                      ▼                   │ (on failure)       ▼
//!              ┌───────────────┐           │          ┌────────────────┐
//!              │ SpeechBackend │───────────┘          │ FallbackSpeech │
//!              │ (neural TTS)  │                      │ (system voice) │
//!              └───────┬───────┘                      └────────────────┘
//!                      ▼
//!                ┌───────────┐
//!                │ AudioSink │
//!                └───────────┘
//! ```

pub mod api;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod speech;
pub mod turn;

pub use config::Config;
pub use error::{Error, Result};
pub use events::{Event, EventBus};
pub use orchestrator::{OrchestratorBuilder, TurnOrchestrator};
pub use turn::{ChatMessage, Role, SpeechRoute, Turn, TurnId, TurnPhase};
