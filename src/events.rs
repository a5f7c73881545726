//! Session events for front-ends
//!
//! Events are broadcast best-effort: with no subscribers they are dropped.

use tokio::sync::broadcast;

use crate::turn::{TurnId, TurnPhase};

/// Capacity of the broadcast channel
const CHANNEL_CAPACITY: usize = 64;

/// Something a front-end may want to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Microphone capture started or stopped
    ListeningChanged(bool),
    /// A turn moved to a new phase
    PhaseChanged { turn: TurnId, phase: TurnPhase },
    /// A reply became visible
    ReplyVisible { turn: TurnId, text: String },
    /// Human-readable speech engine status
    Status(String),
}

/// Cloneable sender half shared by the orchestrator and backend initializer
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event
    pub fn emit(&self, event: Event) {
        // No receivers is not an error
        let _ = self.tx.send(event);
    }

    /// Publish a status line
    pub fn status(&self, status: impl Into<String>) {
        let status = status.into();
        tracing::debug!(%status, "speech status");
        self.emit(Event::Status(status));
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
