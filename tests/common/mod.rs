//! Shared test doubles
//!
//! Every double writes to a shared [`Journal`] so tests can assert on the
//! order of collaborator calls across components.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use parley::chat::ChatService;
use parley::speech::{
    AudioClip, AudioSink, Capability, DegradedPolicy, FallbackSpeech, PrimaryLoader, PrimarySpeech,
    SpeechBackend, TranscriptBuffer, VoiceDescriptor,
};
use parley::{ChatMessage, Error, EventBus, Result, Turn, TurnOrchestrator};

/// Ordered record of collaborator calls
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    /// Index of the first entry starting with `prefix`
    pub fn first(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }

    /// Index of the last entry starting with `prefix`
    pub fn last(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().rposition(|e| e.starts_with(prefix))
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Chat service answering from a script
pub struct MockChat {
    journal: Journal,
    replies: Mutex<VecDeque<Result<String>>>,
    delay: Option<Duration>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockChat {
    pub fn replying(journal: &Journal, replies: &[&str]) -> Self {
        Self {
            journal: journal.clone(),
            replies: Mutex::new(replies.iter().map(|r| Ok((*r).to_string())).collect()),
            delay: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(journal: &Journal) -> Self {
        let chat = Self::replying(journal, &[]);
        chat.replies
            .lock()
            .unwrap()
            .push_back(Err(Error::Chat("upstream returned 500".to_string())));
        chat
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Conversations received, one per call
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatService for MockChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.journal.push("chat");
        self.seen.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok("Let's keep practicing.".to_string()))
    }
}

/// Neural voice double
#[derive(Debug, Clone)]
pub struct MockPrimary {
    journal: Journal,
    outcome: PrimaryOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryOutcome {
    Audio,
    NoAudio,
    Error,
}

impl MockPrimary {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            outcome: PrimaryOutcome::Audio,
        }
    }

    #[must_use]
    pub const fn with_outcome(mut self, outcome: PrimaryOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

#[async_trait]
impl PrimarySpeech for MockPrimary {
    fn name(&self) -> &str {
        "mock"
    }

    async fn voices(&self) -> Result<Vec<VoiceDescriptor>> {
        Ok(vec![
            VoiceDescriptor {
                id: "en_US-amy-medium".to_string(),
                name: "Amy".to_string(),
                lang: Some("en-US".to_string()),
            },
            VoiceDescriptor {
                id: "en_GB-alan-low".to_string(),
                name: "Alan".to_string(),
                lang: Some("en-GB".to_string()),
            },
        ])
    }

    async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<Option<AudioClip>> {
        self.journal.push(format!("primary:{text}|{}", voice_id.unwrap_or("-")));
        match self.outcome {
            PrimaryOutcome::Audio => Ok(Some(AudioClip::new(text.as_bytes().to_vec(), "audio/mpeg"))),
            PrimaryOutcome::NoAudio => Ok(None),
            PrimaryOutcome::Error => Err(Error::Speech("model crashed".to_string())),
        }
    }
}

/// System voice double
pub struct MockFallback {
    journal: Journal,
    fail: bool,
}

impl MockFallback {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            fail: false,
        }
    }

    pub fn failing(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            fail: true,
        }
    }
}

#[async_trait]
impl FallbackSpeech for MockFallback {
    async fn speak(&self, text: &str, locale: &str) -> Result<()> {
        self.journal.push(format!("fallback:{text}|{locale}"));
        if self.fail {
            return Err(Error::Speech("synthesizer missing".to_string()));
        }
        Ok(())
    }

    async fn cancel(&self) {
        self.journal.push("cancel");
    }
}

/// Audio handle double
pub struct MockSink {
    journal: Journal,
    fail: bool,
}

impl MockSink {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            fail: false,
        }
    }

    pub fn failing(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            fail: true,
        }
    }
}

#[async_trait]
impl AudioSink for MockSink {
    async fn play(&self, clip: AudioClip) -> Result<()> {
        self.journal.push(format!("play:{}", String::from_utf8_lossy(&clip.data)));
        if self.fail {
            return Err(Error::Audio("autoplay blocked".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) {
        self.journal.push("stop");
    }
}

/// What a single [`MockLoader::load`] call does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Succeed,
    Fail,
    Hang,
}

/// Backend loader following a script; once exhausted it repeats `fallback`
pub struct MockLoader {
    journal: Journal,
    script: Mutex<VecDeque<LoadOutcome>>,
    fallback: LoadOutcome,
}

impl MockLoader {
    pub fn new(journal: &Journal, script: &[LoadOutcome], fallback: LoadOutcome) -> Self {
        Self {
            journal: journal.clone(),
            script: Mutex::new(script.iter().copied().collect()),
            fallback,
        }
    }
}

#[async_trait]
impl PrimaryLoader for MockLoader {
    async fn load(&self) -> Result<Arc<dyn PrimarySpeech>> {
        self.journal.push("load");
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
        match outcome {
            LoadOutcome::Succeed => Ok(Arc::new(MockPrimary::new(&self.journal))),
            LoadOutcome::Fail => Err(Error::Speech("wasm module failed to load".to_string())),
            LoadOutcome::Hang => std::future::pending().await,
        }
    }
}

/// Collaborators for one orchestrator; tweak fields before [`Setup::build`]
pub struct Setup {
    pub journal: Journal,
    pub chat: MockChat,
    /// `Some` installs a ready neural voice
    pub primary: Option<MockPrimary>,
    pub fallback: MockFallback,
    pub sink: MockSink,
    pub capability: Capability,
}

impl Setup {
    pub fn new() -> Self {
        let journal = Journal::default();
        Self {
            chat: MockChat::replying(&journal, &["Nice to meet you."]),
            primary: Some(MockPrimary::new(&journal)),
            fallback: MockFallback::new(&journal),
            sink: MockSink::new(&journal),
            capability: Capability::Available,
            journal,
        }
    }

    pub async fn build(self) -> Harness {
        let backend = Arc::new(SpeechBackend::new(DegradedPolicy::AutoEnable));
        if let Some(primary) = self.primary {
            let voices = primary.voices().await.unwrap();
            backend.mark_ready(Arc::new(primary), voices).await;
        }

        let input = Arc::new(TranscriptBuffer::with_capability(self.capability));
        let chat = Arc::new(self.chat);
        let events = EventBus::new();
        let orchestrator = TurnOrchestrator::builder()
            .input(input.clone())
            .chat(chat.clone())
            .backend(backend.clone())
            .fallback(Arc::new(self.fallback))
            .audio(Arc::new(self.sink))
            .locale("en-US")
            .events(events)
            .build()
            .unwrap();

        Harness {
            orchestrator,
            input,
            backend,
            chat,
            journal: self.journal,
        }
    }
}

pub struct Harness {
    pub orchestrator: TurnOrchestrator,
    pub input: Arc<TranscriptBuffer>,
    pub backend: Arc<SpeechBackend>,
    pub chat: Arc<MockChat>,
    pub journal: Journal,
}

impl Harness {
    /// Listen, "hear" `utterance`, and submit it
    pub async fn say(&self, utterance: &str) -> Result<Option<Turn>> {
        self.orchestrator.start_listening().await?;
        self.input.push(utterance);
        self.orchestrator.stop_listening_and_submit().await
    }
}
