//! Conversation turns and chat messages
//!
//! A [`Turn`] is one user utterance and the assistant reply to it. Phases only
//! move forward; the single exception is the fallback re-entry
//! `Speaking -> Failed -> Speaking` after the primary voice gives up.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Opaque turn identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(Uuid);

impl TurnId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a turn (or the session, for `Idle`/`Listening`) currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    Listening,
    Transcribed,
    AwaitingReply,
    Speaking,
    Done,
    Failed,
}

impl TurnPhase {
    /// Whether the phase ends the turn
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Which speech backend delivered a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechRoute {
    /// Neural TTS audio played through the shared audio handle
    Primary,
    /// System speech synthesizer
    Fallback,
}

/// One user utterance and its reply
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    id: TurnId,
    phase: TurnPhase,
    user_text: String,
    reply_text: Option<String>,
    visible: bool,
    route: Option<SpeechRoute>,
    #[serde(skip)]
    fell_back: bool,
}

impl Turn {
    /// Create a turn for a finalized utterance
    #[must_use]
    pub fn new(user_text: impl Into<String>) -> Self {
        Self {
            id: TurnId::new(),
            phase: TurnPhase::Transcribed,
            user_text: user_text.into(),
            reply_text: None,
            visible: false,
            route: None,
            fell_back: false,
        }
    }

    #[must_use]
    pub const fn id(&self) -> TurnId {
        self.id
    }

    #[must_use]
    pub const fn phase(&self) -> TurnPhase {
        self.phase
    }

    #[must_use]
    pub fn user_text(&self) -> &str {
        &self.user_text
    }

    #[must_use]
    pub fn reply_text(&self) -> Option<&str> {
        self.reply_text.as_deref()
    }

    /// Whether the reply has been surfaced to the user
    #[must_use]
    pub const fn visible(&self) -> bool {
        self.visible
    }

    /// Backend that delivered (or last attempted) the reply
    #[must_use]
    pub const fn route(&self) -> Option<SpeechRoute> {
        self.route
    }

    /// Move to the next phase
    ///
    /// # Errors
    ///
    /// Returns `Error::Turn` if the transition is not allowed
    pub fn advance(&mut self, next: TurnPhase) -> Result<()> {
        use TurnPhase::{AwaitingReply, Done, Failed, Speaking, Transcribed};

        let allowed = match (self.phase, next) {
            (Transcribed, AwaitingReply) | (AwaitingReply, Speaking) | (Speaking, Done | Failed) => {
                true
            }
            // Fallback re-entry, at most once per turn
            (Failed, Speaking) => !self.fell_back,
            _ => false,
        };

        if !allowed {
            return Err(Error::Turn(format!(
                "invalid transition {:?} -> {next:?} for turn {}",
                self.phase, self.id
            )));
        }

        if (self.phase, next) == (Failed, Speaking) {
            self.fell_back = true;
        }
        if next.is_terminal() {
            // A reply is never left hidden once speech has finished or failed
            self.visible = true;
        }

        self.phase = next;
        Ok(())
    }

    /// Record the reply text; it cannot be replaced afterwards
    ///
    /// # Errors
    ///
    /// Returns `Error::Turn` if a reply is already set
    pub fn set_reply(&mut self, text: impl Into<String>) -> Result<()> {
        if self.reply_text.is_some() {
            return Err(Error::Turn(format!("reply already set for turn {}", self.id)));
        }
        self.reply_text = Some(text.into());
        Ok(())
    }

    /// Surface the reply. Returns `true` if it was hidden before.
    pub const fn reveal(&mut self) -> bool {
        let changed = !self.visible;
        self.visible = true;
        changed
    }

    pub(crate) const fn set_route(&mut self, route: SpeechRoute) {
        self.route = Some(route);
    }
}

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A message in the conversation sent to the chat service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}
