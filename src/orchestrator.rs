//! Turn orchestration
//!
//! Sequences one conversational turn: finalize the transcript, ask the chat
//! service, then speak the reply through the neural voice with a single
//! fallback to the system voice.
//!
//! ```text
//! Idle -> Listening -> Transcribed -> AwaitingReply -> Speaking -> Done
//!                                                        |   ^
//!                                                        v   | (once)
//!                                                       Failed
//! ```
//!
//! At most one turn is in `AwaitingReply`/`Speaking` at a time; overlapping
//! submissions are rejected with [`Error::Busy`]. Audio from a previous turn
//! keeps playing after that turn is `Done` and is stopped when the next turn
//! starts.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::chat::{APOLOGY, ChatService};
use crate::events::{Event, EventBus};
use crate::speech::{
    AudioSink, Capability, DegradedPolicy, FallbackSpeech, PrimaryHandle, SpeechBackend,
    SpeechBackendState, SpeechInput, VoiceDescriptor,
};
use crate::turn::{ChatMessage, SpeechRoute, Turn, TurnPhase};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Idle,
    Listening,
    Busy,
}

#[derive(Debug)]
struct Session {
    activity: Activity,
    current: Option<TurnPhase>,
    conversation: Vec<ChatMessage>,
    turns: Vec<Turn>,
}

fn lock(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Returns the session to idle however the turn ends
struct BusyGuard<'a> {
    session: &'a Mutex<Session>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        let mut session = lock(self.session);
        session.activity = Activity::Idle;
        session.current = None;
    }
}

/// Owns the session phase and drives turns through the collaborators
pub struct TurnOrchestrator {
    input: Arc<dyn SpeechInput>,
    chat: Arc<dyn ChatService>,
    backend: Arc<SpeechBackend>,
    fallback: Arc<dyn FallbackSpeech>,
    audio: Arc<dyn AudioSink>,
    locale: String,
    voice: Mutex<Option<String>>,
    session: Mutex<Session>,
    events: EventBus,
}

impl TurnOrchestrator {
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }

    /// Current phase: `Idle`/`Listening` between turns, else the active turn's
    #[must_use]
    pub fn phase(&self) -> TurnPhase {
        let session = self.session();
        match session.activity {
            Activity::Idle => TurnPhase::Idle,
            Activity::Listening => TurnPhase::Listening,
            Activity::Busy => session.current.unwrap_or(TurnPhase::Idle),
        }
    }

    /// Begin continuous capture
    ///
    /// Idempotent while already listening.
    ///
    /// # Errors
    ///
    /// Returns `Error::Capability` if speech input cannot work on this host,
    /// `Error::Busy` while a turn is in progress, or the input's start error
    pub async fn start_listening(&self) -> Result<()> {
        match self.input.capability() {
            Capability::Available => {}
            Capability::Unsupported(reason) => return Err(Error::Capability(reason)),
            Capability::PermissionDenied => {
                return Err(Error::Capability("microphone access denied".to_string()));
            }
        }

        {
            let mut session = self.session();
            match session.activity {
                Activity::Listening => return Ok(()),
                Activity::Busy => return Err(Error::Busy),
                Activity::Idle => session.activity = Activity::Listening,
            }
        }

        if let Err(e) = self.input.start().await {
            // A turn may have taken over while capture was starting
            let mut session = self.session();
            if session.activity == Activity::Listening {
                session.activity = Activity::Idle;
            }
            return Err(e);
        }

        tracing::debug!("listening");
        self.events.emit(Event::ListeningChanged(true));
        Ok(())
    }

    /// Finalize the transcript and run a turn for it
    ///
    /// Returns `Ok(None)` when not listening or when the transcript is blank.
    ///
    /// # Errors
    ///
    /// Returns the input's stop error, or an internal turn error
    pub async fn stop_listening_and_submit(&self) -> Result<Option<Turn>> {
        {
            let mut session = self.session();
            if session.activity != Activity::Listening {
                tracing::debug!("stop requested while not listening");
                return Ok(None);
            }
            session.activity = Activity::Busy;
        }
        let guard = BusyGuard {
            session: &self.session,
        };

        let transcript = self.input.stop().await;
        self.events.emit(Event::ListeningChanged(false));
        let transcript = transcript?;

        if transcript.trim().is_empty() {
            tracing::debug!("blank transcript, no turn created");
            return Ok(None);
        }

        self.run_turn(transcript, guard).await.map(Some)
    }

    /// Submit literal text as if it had just been transcribed
    ///
    /// Returns `Ok(None)` for blank text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` while another turn is in progress
    pub async fn submit_canned_prompt(&self, text: &str) -> Result<Option<Turn>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let was_listening = {
            let mut session = self.session();
            if session.activity == Activity::Busy {
                return Err(Error::Busy);
            }
            let was_listening = session.activity == Activity::Listening;
            session.activity = Activity::Busy;
            was_listening
        };
        let guard = BusyGuard {
            session: &self.session,
        };

        if was_listening {
            // Capture is abandoned; the canned text replaces it
            if let Err(e) = self.input.stop().await {
                tracing::debug!(error = %e, "failed to stop capture for canned prompt");
            }
            self.events.emit(Event::ListeningChanged(false));
        }

        self.run_turn(text.to_string(), guard).await.map(Some)
    }

    /// Speak arbitrary text without creating a turn ("test voice")
    ///
    /// # Errors
    ///
    /// Returns `Error::Busy` unless idle, or the system voice error if both
    /// voices fail
    pub async fn speak_sample(&self, text: &str) -> Result<Option<SpeechRoute>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        {
            let mut session = self.session();
            if session.activity != Activity::Idle {
                return Err(Error::Busy);
            }
            session.activity = Activity::Busy;
        }
        let _guard = BusyGuard {
            session: &self.session,
        };

        self.halt_speech().await;
        if let Some(primary) = self.backend.primary().await {
            match self.play_primary(&primary, text).await {
                Ok(()) => return Ok(Some(SpeechRoute::Primary)),
                Err(e) => tracing::warn!(error = %e, "sample failed on neural voice, falling back"),
            }
        }
        self.fallback.speak(text, &self.locale).await?;
        Ok(Some(SpeechRoute::Fallback))
    }

    /// Toggle the neural voice; returns `false` (no change) until it is ready
    pub async fn set_primary_backend_enabled(&self, enabled: bool) -> bool {
        self.backend.set_enabled(enabled).await
    }

    /// Choose the neural voice for later turns
    ///
    /// # Errors
    ///
    /// Returns `Error::Speech` if the backend lists voices and `id` is not one
    pub async fn select_voice(&self, id: &str) -> Result<()> {
        let voices = self.backend.voices().await;
        if !voices.is_empty() && !voices.iter().any(|v| v.id == id) {
            return Err(Error::Speech(format!("unknown voice: {id}")));
        }
        *self.voice.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.to_string());
        tracing::info!(voice = id, "voice selected");
        Ok(())
    }

    #[must_use]
    pub fn selected_voice(&self) -> Option<String> {
        self.voice.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub async fn backend_state(&self) -> SpeechBackendState {
        self.backend.state().await
    }

    /// Voices offered by the neural backend (empty until it settles)
    pub async fn voices(&self) -> Vec<VoiceDescriptor> {
        self.backend.voices().await
    }

    /// Turns of this session, oldest first
    #[must_use]
    pub fn turns(&self) -> Vec<Turn> {
        self.session().turns.clone()
    }

    /// Messages sent to the chat service so far
    #[must_use]
    pub fn conversation(&self) -> Vec<ChatMessage> {
        self.session().conversation.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    async fn run_turn(&self, user_text: String, _guard: BusyGuard<'_>) -> Result<Turn> {
        // A new turn never overlaps audio from the previous one
        self.halt_speech().await;

        let mut turn = Turn::new(user_text);
        tracing::info!(turn = %turn.id(), chars = turn.user_text().len(), "turn started");
        self.record(&turn);

        let history = {
            let mut session = self.session();
            session.conversation.push(ChatMessage::user(turn.user_text()));
            session.conversation.clone()
        };

        self.transition(&mut turn, TurnPhase::AwaitingReply)?;
        match self.chat.complete(&history).await {
            Ok(reply) => {
                tracing::debug!(turn = %turn.id(), chars = reply.len(), "reply received");
                turn.set_reply(reply)?;
            }
            Err(e) => {
                tracing::warn!(turn = %turn.id(), error = %e, "chat request failed, speaking apology");
                turn.set_reply(APOLOGY)?;
                self.reveal(&mut turn);
            }
        }

        let reply = turn.reply_text().unwrap_or_default().to_string();
        self.session().conversation.push(ChatMessage::assistant(reply.clone()));

        self.transition(&mut turn, TurnPhase::Speaking)?;
        self.speak_reply(&mut turn, &reply).await?;

        tracing::info!(
            turn = %turn.id(),
            phase = ?turn.phase(),
            route = ?turn.route(),
            "turn finished"
        );
        Ok(turn)
    }

    /// Speak through the neural voice, falling back to the system voice once
    ///
    /// A system voice error intentionally ends the turn in terminal `Failed`
    /// rather than `Done`, with the reply already visible.
    async fn speak_reply(&self, turn: &mut Turn, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            tracing::debug!(turn = %turn.id(), "empty reply, nothing to speak");
            self.reveal(turn);
            return self.transition(turn, TurnPhase::Done);
        }

        if let Some(primary) = self.backend.primary().await {
            match self.play_primary(&primary, text).await {
                Ok(()) => {
                    turn.set_route(SpeechRoute::Primary);
                    self.reveal(turn);
                    return self.transition(turn, TurnPhase::Done);
                }
                Err(e) => {
                    tracing::warn!(turn = %turn.id(), error = %e, "neural voice failed, falling back");
                    self.transition(turn, TurnPhase::Failed)?;
                    self.transition(turn, TurnPhase::Speaking)?;
                }
            }
        }

        turn.set_route(SpeechRoute::Fallback);
        self.reveal(turn);
        match self.fallback.speak(text, &self.locale).await {
            Ok(()) => self.transition(turn, TurnPhase::Done),
            Err(e) => {
                tracing::warn!(turn = %turn.id(), error = %e, "system voice failed");
                self.transition(turn, TurnPhase::Failed)
            }
        }
    }

    async fn play_primary(&self, primary: &PrimaryHandle, text: &str) -> Result<()> {
        let voice = self.selected_voice();
        let clip = primary
            .synthesize(text, voice.as_deref())
            .await?
            .ok_or_else(|| Error::Speech("neural voice produced no audio".to_string()))?;

        self.audio.stop().await;
        self.audio.play(clip).await
    }

    async fn halt_speech(&self) {
        self.audio.stop().await;
        self.fallback.cancel().await;
    }

    fn transition(&self, turn: &mut Turn, phase: TurnPhase) -> Result<()> {
        let was_visible = turn.visible();
        turn.advance(phase)?;
        if !was_visible && turn.visible() {
            self.announce(turn);
        }
        self.record(turn);
        Ok(())
    }

    fn reveal(&self, turn: &mut Turn) {
        if turn.reveal() {
            self.announce(turn);
            self.store(turn);
        }
    }

    fn announce(&self, turn: &Turn) {
        self.events.emit(Event::ReplyVisible {
            turn: turn.id(),
            text: turn.reply_text().unwrap_or_default().to_string(),
        });
    }

    fn store(&self, turn: &Turn) {
        let mut session = self.session();
        session.current = Some(turn.phase());
        match session.turns.iter_mut().find(|t| t.id() == turn.id()) {
            Some(existing) => existing.clone_from(turn),
            None => session.turns.push(turn.clone()),
        }
    }

    /// Store the turn and announce its phase
    fn record(&self, turn: &Turn) {
        self.store(turn);
        self.events.emit(Event::PhaseChanged {
            turn: turn.id(),
            phase: turn.phase(),
        });
    }
}

/// Injects collaborators into a [`TurnOrchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    input: Option<Arc<dyn SpeechInput>>,
    chat: Option<Arc<dyn ChatService>>,
    backend: Option<Arc<SpeechBackend>>,
    fallback: Option<Arc<dyn FallbackSpeech>>,
    audio: Option<Arc<dyn AudioSink>>,
    locale: Option<String>,
    voice: Option<String>,
    events: Option<EventBus>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn input(mut self, input: Arc<dyn SpeechInput>) -> Self {
        self.input = Some(input);
        self
    }

    #[must_use]
    pub fn chat(mut self, chat: Arc<dyn ChatService>) -> Self {
        self.chat = Some(chat);
        self
    }

    /// Neural voice slot; defaults to one that never becomes ready
    #[must_use]
    pub fn backend(mut self, backend: Arc<SpeechBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub fn fallback(mut self, fallback: Arc<dyn FallbackSpeech>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn audio(mut self, audio: Arc<dyn AudioSink>) -> Self {
        self.audio = Some(audio);
        self
    }

    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Share an event bus with other components (e.g. the initializer)
    #[must_use]
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the orchestrator
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a required collaborator is missing
    pub fn build(self) -> Result<TurnOrchestrator> {
        let missing = |what: &str| Error::Config(format!("orchestrator requires {what}"));

        Ok(TurnOrchestrator {
            input: self.input.ok_or_else(|| missing("a speech input"))?,
            chat: self.chat.ok_or_else(|| missing("a chat service"))?,
            backend: self
                .backend
                .unwrap_or_else(|| Arc::new(SpeechBackend::new(DegradedPolicy::default()))),
            fallback: self.fallback.ok_or_else(|| missing("a fallback voice"))?,
            audio: self.audio.ok_or_else(|| missing("an audio sink"))?,
            locale: self.locale.unwrap_or_else(|| "en-US".to_string()),
            voice: Mutex::new(self.voice),
            session: Mutex::new(Session {
                activity: Activity::Idle,
                current: None,
                conversation: Vec::new(),
                turns: Vec::new(),
            }),
            events: self.events.unwrap_or_default(),
        })
    }
}
