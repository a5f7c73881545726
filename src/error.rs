//! Error types for Parley

use thiserror::Error;

/// Result type alias for Parley operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Parley
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Another turn is awaiting a reply or speaking
    #[error("a turn is already in progress")]
    Busy,

    /// Speech capture is unavailable on this host
    #[error("speech input unavailable: {0}")]
    Capability(String),

    /// Invalid turn transition or mutation
    #[error("turn error: {0}")]
    Turn(String),

    /// Chat completion error
    #[error("chat error: {0}")]
    Chat(String),

    /// Speech synthesis error (primary or system voice)
    #[error("speech error: {0}")]
    Speech(String),

    /// Audio playback error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
