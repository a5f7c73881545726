//! Chat through a running Parley gateway

use async_trait::async_trait;
use serde::Serialize;

use super::ChatService;
use crate::turn::ChatMessage;
use crate::{Error, Result};

/// Posts the conversation to `{base_url}/api/chat` and reads a plain-text reply
#[derive(Debug, Clone)]
pub struct GatewayChat {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayChat {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl ChatService for GatewayChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        #[derive(Serialize)]
        struct GatewayRequest<'a> {
            messages: &'a [ChatMessage],
        }

        let response = self
            .client
            .post(self.endpoint())
            .json(&GatewayRequest { messages })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Chat(format!("gateway error: {}", response.status())));
        }

        Ok(response.text().await?)
    }
}
