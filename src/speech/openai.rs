//! Neural text-to-speech over the `OpenAI` speech API

use std::sync::Arc;

use async_trait::async_trait;

use super::{AudioClip, PrimaryLoader, PrimarySpeech, VoiceDescriptor};
use crate::{Error, Result};

/// Voices offered by the `OpenAI` speech API: (id, display name, description)
pub const OPENAI_VOICES: [(&str, &str, &str); 6] = [
    ("alloy", "Alloy", "Versatile, balanced voice"),
    ("echo", "Echo", "Warm, neutral voice"),
    ("fable", "Fable", "Narrative, eloquent voice"),
    ("onyx", "Onyx", "Deep, authoritative voice"),
    ("nova", "Nova", "Bright, friendly voice"),
    ("shimmer", "Shimmer", "Clear, pleasant voice"),
];

/// Synthesizes speech through `POST {base_url}/audio/speech`
#[derive(Debug, Clone)]
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
}

impl OpenAiSpeech {
    /// Create a new TTS instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, voice: String, speed: f32) -> Result<Self> {
        Self::with_model(api_key, voice, speed, "tts-1".to_string())
    }

    /// Create a new TTS instance with a custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn with_model(api_key: String, voice: String, speed: f32, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key,
            voice,
            speed,
            model,
        })
    }

    /// Point at an OpenAI-compatible server
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Default voice identifier
    #[must_use]
    pub fn voice(&self) -> &str {
        &self.voice
    }

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the API answers non-2xx
    pub async fn synthesize_mp3(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Speech(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(bytes = audio.len(), voice, "synthesized speech");
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl PrimarySpeech for OpenAiSpeech {
    fn name(&self) -> &str {
        "openai"
    }

    async fn voices(&self) -> Result<Vec<VoiceDescriptor>> {
        Ok(OPENAI_VOICES
            .iter()
            .map(|(id, name, description)| VoiceDescriptor {
                id: (*id).to_string(),
                name: format!("{name} - {description}"),
                lang: None,
            })
            .collect())
    }

    async fn synthesize(&self, text: &str, voice_id: Option<&str>) -> Result<Option<AudioClip>> {
        let voice = voice_id.unwrap_or(&self.voice);
        let audio = self.synthesize_mp3(text, voice).await?;
        if audio.is_empty() {
            return Ok(None);
        }
        Ok(Some(AudioClip::new(audio, "audio/mpeg")))
    }
}

/// Builds an [`OpenAiSpeech`] backend at startup
#[derive(Debug, Clone)]
pub struct OpenAiSpeechLoader {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub speed: f32,
}

#[async_trait]
impl PrimaryLoader for OpenAiSpeechLoader {
    async fn load(&self) -> Result<Arc<dyn PrimarySpeech>> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("OPENAI_API_KEY not set".to_string()))?;

        let speech = OpenAiSpeech::with_model(api_key, self.voice.clone(), self.speed, self.model.clone())?
            .with_base_url(&self.base_url);
        Ok(Arc::new(speech))
    }
}
