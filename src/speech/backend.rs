//! Neural backend readiness and initialization
//!
//! [`SpeechBackend`] is the process-wide slot holding the optional neural
//! voice and its readiness. [`BackendInitializer`] probes a [`PrimaryLoader`]
//! behind a timeout, retrying up to a fixed ceiling. When the ceiling is hit
//! the backend is marked ready-but-degraded instead of failed, so the
//! premium voice stays on offer even if it later produces no audio.
//!
//! Readiness only ever moves `NotReady -> Ready` or `NotReady -> Degraded`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{AudioClip, DEFAULT_VOICE_ID, PrimaryLoader, PrimarySpeech, VoiceDescriptor};
use crate::config::SpeechConfig;
use crate::events::EventBus;
use crate::{Error, Result};

/// Whether a degraded backend is switched on without user action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradedPolicy {
    /// Enable on both full and degraded readiness
    #[default]
    AutoEnable,
    /// Enable on full readiness only; degraded waits for the user
    RequireOptIn,
}

impl FromStr for DegradedPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto-enable" | "auto" => Ok(Self::AutoEnable),
            "require-opt-in" | "opt-in" => Ok(Self::RequireOptIn),
            other => Err(Error::Config(format!("unknown degraded policy: {other}"))),
        }
    }
}

/// Readiness of the neural backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    NotReady,
    /// Initialized and prepared
    Ready,
    /// Retry budget exhausted; usable on a best-effort basis
    Degraded,
}

impl Readiness {
    #[must_use]
    pub const fn is_ready(self) -> bool {
        !matches!(self, Self::NotReady)
    }
}

/// Snapshot of the process-wide backend state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeechBackendState {
    pub readiness: Readiness,
    pub primary_ready: bool,
    pub primary_enabled: bool,
    pub init_attempts: u32,
}

/// Typed outcome of the capability probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Ready { voices: Vec<VoiceDescriptor> },
    Degraded { attempts: u32, backend_loaded: bool },
}

struct Inner {
    readiness: Readiness,
    enabled: bool,
    attempts: u32,
    speech: Option<Arc<dyn PrimarySpeech>>,
    voices: Vec<VoiceDescriptor>,
}

/// Slot for the optional neural voice
pub struct SpeechBackend {
    inner: RwLock<Inner>,
    policy: DegradedPolicy,
}

impl fmt::Debug for SpeechBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpeechBackend")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl SpeechBackend {
    #[must_use]
    pub fn new(policy: DegradedPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner {
                readiness: Readiness::NotReady,
                enabled: false,
                attempts: 0,
                speech: None,
                voices: Vec::new(),
            }),
            policy,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> DegradedPolicy {
        self.policy
    }

    pub async fn state(&self) -> SpeechBackendState {
        let inner = self.inner.read().await;
        SpeechBackendState {
            readiness: inner.readiness,
            primary_ready: inner.readiness.is_ready(),
            primary_enabled: inner.enabled,
            init_attempts: inner.attempts,
        }
    }

    /// Voices reported by the backend (the default voice if it gave none)
    pub async fn voices(&self) -> Vec<VoiceDescriptor> {
        self.inner.read().await.voices.clone()
    }

    /// Toggle the neural voice. Rejected (returns `false`) until ready.
    pub async fn set_enabled(&self, enabled: bool) -> bool {
        let mut inner = self.inner.write().await;
        if !inner.readiness.is_ready() {
            tracing::debug!(enabled, "ignoring neural voice toggle before readiness");
            return false;
        }
        inner.enabled = enabled;
        tracing::info!(enabled, "neural voice toggled");
        true
    }

    /// Install a fully initialized backend and enable it
    ///
    /// Returns `false` if readiness was already settled.
    pub async fn mark_ready(&self, speech: Arc<dyn PrimarySpeech>, voices: Vec<VoiceDescriptor>) -> bool {
        let mut inner = self.inner.write().await;
        if inner.readiness.is_ready() {
            return false;
        }
        tracing::info!(backend = speech.name(), voices = voices.len(), "neural voice ready");
        inner.readiness = Readiness::Ready;
        inner.enabled = true;
        inner.speech = Some(speech);
        inner.voices = voices;
        true
    }

    /// Settle into degraded readiness, keeping whatever backend was loaded
    ///
    /// Returns `false` if readiness was already settled.
    pub async fn mark_degraded(&self, speech: Option<Arc<dyn PrimarySpeech>>) -> bool {
        let mut inner = self.inner.write().await;
        if inner.readiness.is_ready() {
            return false;
        }
        inner.readiness = Readiness::Degraded;
        inner.enabled = self.policy == DegradedPolicy::AutoEnable;
        inner.speech = speech;
        if inner.voices.is_empty() {
            inner.voices = vec![VoiceDescriptor::fallback_default()];
        }
        tracing::warn!(
            attempts = inner.attempts,
            enabled = inner.enabled,
            backend_loaded = inner.speech.is_some(),
            "neural voice degraded"
        );
        true
    }

    /// Count a failed initialization attempt, returning the new total
    pub async fn record_failed_attempt(&self) -> u32 {
        let mut inner = self.inner.write().await;
        if !inner.readiness.is_ready() {
            inner.attempts = inner.attempts.saturating_add(1);
        }
        inner.attempts
    }

    /// Settled outcome, or `None` while still initializing
    pub async fn availability(&self) -> Option<Availability> {
        let inner = self.inner.read().await;
        match inner.readiness {
            Readiness::NotReady => None,
            Readiness::Ready => Some(Availability::Ready {
                voices: inner.voices.clone(),
            }),
            Readiness::Degraded => Some(Availability::Degraded {
                attempts: inner.attempts,
                backend_loaded: inner.speech.is_some(),
            }),
        }
    }

    /// The neural voice, if it is both ready and enabled
    pub async fn primary(&self) -> Option<PrimaryHandle> {
        let inner = self.inner.read().await;
        (inner.enabled && inner.readiness.is_ready()).then(|| PrimaryHandle {
            speech: inner.speech.clone(),
        })
    }
}

/// A usable neural voice; a degraded slot may hold no backend at all
#[derive(Clone)]
pub struct PrimaryHandle {
    speech: Option<Arc<dyn PrimarySpeech>>,
}

impl PrimaryHandle {
    /// Synthesize through the backend; no backend means no audio
    ///
    /// # Errors
    ///
    /// Propagates backend synthesis errors
    pub async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<Option<AudioClip>> {
        match &self.speech {
            Some(speech) => speech.synthesize(text, voice_id).await,
            None => Ok(None),
        }
    }
}

/// Retry budget and timing for backend initialization
#[derive(Debug, Clone)]
pub struct InitPolicy {
    pub max_attempts: u32,
    pub load_timeout: Duration,
    pub retry_delay: Duration,
    pub default_voice: String,
}

impl Default for InitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            load_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
            default_voice: DEFAULT_VOICE_ID.to_string(),
        }
    }
}

impl From<&SpeechConfig> for InitPolicy {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            max_attempts: config.init_attempts.max(1),
            load_timeout: config.load_timeout(),
            retry_delay: config.retry_delay(),
            default_voice: config.voice.clone(),
        }
    }
}

/// Brings up the neural voice in the background
pub struct BackendInitializer {
    backend: Arc<SpeechBackend>,
    loader: Arc<dyn PrimaryLoader>,
    policy: InitPolicy,
    events: EventBus,
}

impl BackendInitializer {
    #[must_use]
    pub fn new(
        backend: Arc<SpeechBackend>,
        loader: Arc<dyn PrimaryLoader>,
        policy: InitPolicy,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            loader,
            policy,
            events,
        }
    }

    /// Run initialization on the runtime
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Availability> {
        tokio::spawn(self.run())
    }

    /// Attempt initialization until success or the retry ceiling
    pub async fn run(self) -> Availability {
        let max = self.policy.max_attempts.max(1);
        let mut loaded: Option<Arc<dyn PrimarySpeech>> = None;

        loop {
            if let Some(settled) = self.backend.availability().await {
                tracing::debug!(?settled, "speech engine already settled");
                return settled;
            }

            let attempt = self.backend.state().await.init_attempts + 1;
            tracing::info!(attempt, max, "loading speech engine");
            self.events.status("Loading speech engine...");

            match self.attempt(&mut loaded).await {
                Ok((speech, voices)) => {
                    self.backend.mark_ready(speech, voices.clone()).await;
                    self.events.status("Ready to speak");
                    return Availability::Ready { voices };
                }
                Err(e) => {
                    let attempts = self.backend.record_failed_attempt().await;
                    tracing::warn!(error = %e, attempts, max, "speech engine initialization failed");

                    if attempts >= max {
                        let backend_loaded = loaded.is_some();
                        self.backend.mark_degraded(loaded).await;
                        self.events.status("Ready with limited capability");
                        return Availability::Degraded {
                            attempts,
                            backend_loaded,
                        };
                    }

                    self.events.status("Speech engine initialization failed");
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
            }
        }
    }

    async fn attempt(
        &self,
        loaded: &mut Option<Arc<dyn PrimarySpeech>>,
    ) -> Result<(Arc<dyn PrimarySpeech>, Vec<VoiceDescriptor>)> {
        let speech = match tokio::time::timeout(self.policy.load_timeout, self.loader.load()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Speech(format!(
                    "backend load timed out after {}s",
                    self.policy.load_timeout.as_secs_f32()
                )));
            }
        };
        *loaded = Some(Arc::clone(&speech));

        let voices = match speech.voices().await {
            Ok(voices) if !voices.is_empty() => voices,
            Ok(_) => {
                tracing::debug!("backend listed no voices, using default");
                vec![VoiceDescriptor::fallback_default()]
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to list voices, using default");
                vec![VoiceDescriptor::fallback_default()]
            }
        };

        let events = self.events.clone();
        let progress = move |percent: u8| {
            events.status(format!("Downloading voice model: {percent}%"));
        };
        speech.prepare(&self.policy.default_voice, &progress).await?;

        Ok((speech, voices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_parses_aliases() {
        assert_eq!("auto".parse::<DegradedPolicy>().unwrap(), DegradedPolicy::AutoEnable);
        assert_eq!(
            " Require-Opt-In ".parse::<DegradedPolicy>().unwrap(),
            DegradedPolicy::RequireOptIn
        );
        assert!("sometimes".parse::<DegradedPolicy>().is_err());
    }

    #[tokio::test]
    async fn toggle_rejected_before_ready() {
        let backend = SpeechBackend::new(DegradedPolicy::AutoEnable);
        assert!(!backend.set_enabled(true).await);
        let state = backend.state().await;
        assert!(!state.primary_enabled);
        assert!(!state.primary_ready);
        assert!(backend.primary().await.is_none());
    }

    #[tokio::test]
    async fn degraded_respects_policy() {
        let auto = SpeechBackend::new(DegradedPolicy::AutoEnable);
        assert!(auto.mark_degraded(None).await);
        assert!(auto.state().await.primary_enabled);

        let opt_in = SpeechBackend::new(DegradedPolicy::RequireOptIn);
        assert!(opt_in.mark_degraded(None).await);
        let state = opt_in.state().await;
        assert!(state.primary_ready);
        assert!(!state.primary_enabled);
        assert!(opt_in.set_enabled(true).await);
        assert!(opt_in.state().await.primary_enabled);
    }

    #[tokio::test]
    async fn degraded_without_backend_yields_no_audio() {
        let backend = SpeechBackend::new(DegradedPolicy::AutoEnable);
        backend.mark_degraded(None).await;
        let handle = backend.primary().await.unwrap();
        assert!(handle.synthesize("hi", None).await.unwrap().is_none());
        assert_eq!(backend.voices().await, vec![VoiceDescriptor::fallback_default()]);
    }

    #[tokio::test]
    async fn readiness_settles_once() {
        let backend = SpeechBackend::new(DegradedPolicy::AutoEnable);
        assert!(backend.mark_degraded(None).await);
        assert!(!backend.mark_degraded(None).await);
        assert_eq!(backend.state().await.readiness, Readiness::Degraded);

        let before = backend.record_failed_attempt().await;
        assert_eq!(before, 0);
    }
}
