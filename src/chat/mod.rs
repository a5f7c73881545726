//! Chat completion services
//!
//! Replies are requested in one piece; streaming is not part of the contract.

mod gateway;
mod openai;

use async_trait::async_trait;

pub use gateway::GatewayChat;
pub use openai::OpenAiChat;

use crate::Result;
use crate::turn::ChatMessage;

/// Reply spoken when the chat service fails
pub const APOLOGY: &str = "Sorry, I encountered an error. Please try again later.";

/// Opening prompt offered before the first turn
pub const CANNED_PROMPT: &str = "Hello, I want to practice speaking English. Can you pretend to be an English teacher and help me practice speaking English? Limit your response to be at most 2 sentences";

/// Produces the assistant reply for a conversation
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Complete the conversation; `messages` is ordered oldest first
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}
