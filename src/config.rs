//! Configuration management for Parley
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::speech::DegradedPolicy;
use crate::{Error, Result};

/// Parley configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat completion settings
    pub chat: ChatConfig,

    /// Speech output settings
    pub speech: SpeechConfig,

    /// HTTP gateway settings
    pub api_server: ApiServerConfig,
}

/// Chat completion configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of an OpenAI-compatible API
    pub api_url: String,

    /// API key (from `OPENAI_API_KEY`)
    pub api_key: Option<String>,

    /// Model used for chat completions
    pub model: String,

    /// Optional system prompt prepended to every request
    pub system_prompt: Option<String>,

    /// Talk to a running Parley gateway (`/api/chat`) instead of the LLM API
    pub gateway_url: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            system_prompt: None,
            gateway_url: None,
        }
    }
}

/// Speech output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Try to bring up the neural TTS backend at startup
    pub neural: bool,

    /// Base URL of the neural TTS API
    pub tts_url: String,

    /// Neural TTS model
    pub tts_model: String,

    /// Neural TTS voice identifier
    pub voice: String,

    /// Neural TTS speed multiplier (0.25 to 4.0)
    pub speed: f32,

    /// Locale handed to the system voice
    pub locale: String,

    /// Whether a degraded neural backend is switched on automatically
    pub degraded_policy: DegradedPolicy,

    /// Initialization attempts before settling into degraded mode
    pub init_attempts: u32,

    /// Upper bound for a single backend load, in seconds
    pub load_timeout_secs: u64,

    /// Pause between initialization attempts, in milliseconds
    pub retry_delay_ms: u64,

    /// System speech synthesizer command; `{locale}` is substituted and the
    /// text is appended as the last argument
    pub system_voice: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            neural: true,
            tts_url: "https://api.openai.com/v1".to_string(),
            tts_model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            speed: 1.0,
            locale: "en-US".to_string(),
            degraded_policy: DegradedPolicy::AutoEnable,
            init_attempts: 5,
            load_timeout_secs: 5,
            retry_delay_ms: 1000,
            system_voice: default_system_voice().to_string(),
        }
    }
}

impl SpeechConfig {
    /// Load timeout as a `Duration`
    #[must_use]
    pub const fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    /// Retry delay as a `Duration`
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// HTTP gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Hosts the `/api/proxy` endpoint may fetch from
    pub proxy_hosts: Vec<String>,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            proxy_hosts: vec!["huggingface.co".to_string(), "cdn.jsdelivr.net".to_string()],
        }
    }
}

const fn default_system_voice() -> &'static str {
    if cfg!(target_os = "macos") {
        "say"
    } else {
        "espeak-ng -v {locale}"
    }
}

/// Path of the user config file (`~/.config/parley/config.toml` on Linux)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "parley", "parley")
        .map(|d| d.config_dir().join("config.toml"))
}

impl Config {
    /// Load configuration from an explicit file, the default file if it
    /// exists, and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or if the result
    /// fails validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };

        let mut config = if let Some(file) = file {
            tracing::debug!(path = %file.display(), "reading config file");
            let raw = std::fs::read_to_string(&file)?;
            Self::from_toml_str(&raw)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Overlay environment variables using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.chat.api_key = Some(key);
        }
        if let Some(url) = lookup("PARLEY_CHAT_URL") {
            self.chat.api_url = url;
        }
        if let Some(model) = lookup("PARLEY_CHAT_MODEL") {
            self.chat.model = model;
        }
        if let Some(prompt) = lookup("PARLEY_SYSTEM_PROMPT") {
            self.chat.system_prompt = Some(prompt);
        }
        if let Some(url) = lookup("PARLEY_GATEWAY_URL") {
            self.chat.gateway_url = Some(url);
        }
        if let Some(model) = lookup("PARLEY_TTS_MODEL") {
            self.speech.tts_model = model;
        }
        if let Some(voice) = lookup("PARLEY_TTS_VOICE") {
            self.speech.voice = voice;
        }
        if let Some(locale) = lookup("PARLEY_LOCALE") {
            self.speech.locale = locale;
        }
        if let Some(policy) = lookup("PARLEY_DEGRADED_POLICY") {
            match policy.parse() {
                Ok(p) => self.speech.degraded_policy = p,
                Err(e) => tracing::warn!(value = %policy, error = %e, "ignoring PARLEY_DEGRADED_POLICY"),
            }
        }
        if let Some(voice) = lookup("PARLEY_SYSTEM_VOICE") {
            self.speech.system_voice = voice;
        }
        if let Some(port) = lookup("PARLEY_API_PORT").and_then(|s| s.parse().ok()) {
            self.api_server.port = port;
        }
    }

    /// Check invariants the rest of the crate relies on
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.speech.init_attempts == 0 {
            return Err(Error::Config("speech.init_attempts must be at least 1".to_string()));
        }
        if self.speech.load_timeout_secs == 0 {
            return Err(Error::Config("speech.load_timeout_secs must be at least 1".to_string()));
        }
        if !(0.25..=4.0).contains(&self.speech.speed) {
            return Err(Error::Config(format!(
                "speech.speed must be between 0.25 and 4.0, got {}",
                self.speech.speed
            )));
        }
        if self.speech.system_voice.split_whitespace().next().is_none() {
            return Err(Error::Config("speech.system_voice must name a command".to_string()));
        }
        Ok(())
    }
}
