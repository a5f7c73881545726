//! Speech input and output
//!
//! The orchestrator only sees the traits in this module. Concrete adapters:
//! - [`TranscriptBuffer`]: transcript accumulation fed by a recognizer
//! - [`OpenAiSpeech`]: neural TTS over HTTP (primary voice)
//! - [`SystemVoice`]: the host speech synthesizer (fallback voice)
//! - [`AudioPlayback`]: the shared audio playback handle

mod backend;
mod input;
mod openai;
mod playback;
mod system_voice;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

pub use backend::{
    Availability, BackendInitializer, DegradedPolicy, InitPolicy, PrimaryHandle, Readiness,
    SpeechBackend, SpeechBackendState,
};
pub use input::TranscriptBuffer;
pub use openai::{OPENAI_VOICES, OpenAiSpeech, OpenAiSpeechLoader};
pub use playback::{AudioPlayback, Pcm, decode_clip};
pub use system_voice::SystemVoice;

use crate::Result;

/// Voice used when a backend cannot enumerate its own
pub const DEFAULT_VOICE_ID: &str = "en_US-hfc_female-medium";

/// Whether speech capture can work on this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Available,
    /// The recognizer is missing entirely
    Unsupported(String),
    /// The recognizer exists but microphone access was refused
    PermissionDenied,
}

/// Description of a synthesis voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceDescriptor {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
}

impl VoiceDescriptor {
    /// Descriptor for [`DEFAULT_VOICE_ID`]
    #[must_use]
    pub fn fallback_default() -> Self {
        Self {
            id: DEFAULT_VOICE_ID.to_string(),
            name: "English Female".to_string(),
            lang: Some("en-US".to_string()),
        }
    }
}

/// Opaque synthesized audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub content_type: String,
}

impl AudioClip {
    #[must_use]
    pub fn new(data: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            data,
            content_type: content_type.into(),
        }
    }
}

/// Continuous speech capture producing a final transcript
#[async_trait]
pub trait SpeechInput: Send + Sync {
    /// Probe once whether capture can work at all
    fn capability(&self) -> Capability;

    /// Begin capture, discarding any previous transcript
    async fn start(&self) -> Result<()>;

    /// End capture and return the final transcript
    async fn stop(&self) -> Result<String>;
}

/// Optional neural text-to-speech backend
#[async_trait]
pub trait PrimarySpeech: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Voices the backend offers; an empty list is tolerated
    async fn voices(&self) -> Result<Vec<VoiceDescriptor>>;

    /// Make a voice usable (e.g. download its model), reporting percent done
    ///
    /// Backends with nothing to fetch keep the default, which reports nothing.
    async fn prepare(&self, voice_id: &str, progress: &(dyn Fn(u8) + Send + Sync)) -> Result<()> {
        let _ = (voice_id, progress);
        Ok(())
    }

    /// Synthesize `text`; `Ok(None)` means the backend produced no audio
    async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<Option<AudioClip>>;
}

/// Constructs a [`PrimarySpeech`] backend, possibly slowly or not at all
#[async_trait]
pub trait PrimaryLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn PrimarySpeech>>;
}

/// Always-available system speech synthesizer
#[async_trait]
pub trait FallbackSpeech: Send + Sync {
    /// Queue an utterance; returns once it has been handed to the synthesizer
    async fn speak(&self, text: &str, locale: &str) -> Result<()>;

    /// Drop any utterance still being spoken
    async fn cancel(&self);
}

/// The single shared audio playback handle
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Start playing `clip`; resolves once playback has begun
    async fn play(&self, clip: AudioClip) -> Result<()>;

    /// Pause and clear the current source, if any
    async fn stop(&self);
}
