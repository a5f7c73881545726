//! Transcript accumulation for speech capture

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{Capability, SpeechInput};
use crate::Result;

#[derive(Debug, Default)]
struct BufferState {
    capturing: bool,
    transcript: String,
}

/// Collects recognized fragments between `start` and `stop`
///
/// A recognizer (or the console front-end) calls [`TranscriptBuffer::push`]
/// as results arrive; fragments outside a capture window are discarded.
#[derive(Debug)]
pub struct TranscriptBuffer {
    state: Mutex<BufferState>,
    capability: Capability,
}

impl TranscriptBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capability(Capability::Available)
    }

    /// Buffer reporting a fixed capability, for hosts without a recognizer
    #[must_use]
    pub fn with_capability(capability: Capability) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            capability,
        }
    }

    fn state(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a recognized fragment. Returns `false` if not capturing.
    pub fn push(&self, fragment: &str) -> bool {
        let mut state = self.state();
        if !state.capturing {
            tracing::trace!("dropping fragment outside capture window");
            return false;
        }

        let fragment = fragment.trim();
        if fragment.is_empty() {
            return true;
        }
        if !state.transcript.is_empty() {
            state.transcript.push(' ');
        }
        state.transcript.push_str(fragment);
        true
    }

    /// Transcript captured so far
    #[must_use]
    pub fn current(&self) -> String {
        self.state().transcript.clone()
    }

    #[must_use]
    pub fn is_capturing(&self) -> bool {
        self.state().capturing
    }
}

impl Default for TranscriptBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechInput for TranscriptBuffer {
    fn capability(&self) -> Capability {
        self.capability.clone()
    }

    async fn start(&self) -> Result<()> {
        let mut state = self.state();
        state.transcript.clear();
        state.capturing = true;
        Ok(())
    }

    async fn stop(&self) -> Result<String> {
        let mut state = self.state();
        state.capturing = false;
        Ok(std::mem::take(&mut state.transcript))
    }
}
