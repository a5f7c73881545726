//! Host speech synthesizer used as the always-available fallback voice

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::FallbackSpeech;
use crate::{Error, Result};

/// Speaks through an external synthesizer such as `espeak-ng` or `say`
///
/// The command line is split on whitespace; `{locale}` in any argument is
/// replaced by the lowercased locale and the utterance is appended last.
#[derive(Debug)]
pub struct SystemVoice {
    program: String,
    args: Vec<String>,
    current: Mutex<Option<Child>>,
}

impl SystemVoice {
    /// Parse a synthesizer command line
    ///
    /// # Errors
    ///
    /// Returns error if the command line is empty
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(ToString::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Config("empty system voice command".to_string()))?;

        Ok(Self {
            program,
            args: parts.collect(),
            current: Mutex::new(None),
        })
    }

    /// Whether the synthesizer can be found on `PATH`
    #[must_use]
    pub fn is_installed(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    /// Whether an utterance is still being spoken
    pub async fn is_speaking(&self) -> bool {
        let mut current = self.current.lock().await;
        match current.as_mut().map(Child::try_wait) {
            Some(Ok(None)) => true,
            Some(_) => {
                current.take();
                false
            }
            None => false,
        }
    }

    fn build_args(&self, text: &str, locale: &str) -> Vec<String> {
        let locale = locale.to_ascii_lowercase();
        let mut args: Vec<String> = self.args.iter().map(|a| a.replace("{locale}", &locale)).collect();
        args.push(text.to_string());
        args
    }
}

#[async_trait]
impl FallbackSpeech for SystemVoice {
    async fn speak(&self, text: &str, locale: &str) -> Result<()> {
        let mut current = self.current.lock().await;
        if let Some(mut previous) = current.take() {
            let _ = previous.start_kill();
        }

        let child = Command::new(&self.program)
            .args(self.build_args(text, locale))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Speech(format!("failed to start {}: {e}", self.program)))?;

        tracing::debug!(program = %self.program, locale, chars = text.len(), "system voice speaking");
        *current = Some(child);
        Ok(())
    }

    async fn cancel(&self) {
        if let Some(mut child) = self.current.lock().await.take() {
            // Already exited is fine
            let _ = child.start_kill();
            tracing::debug!(program = %self.program, "system voice cancelled");
        }
    }
}
