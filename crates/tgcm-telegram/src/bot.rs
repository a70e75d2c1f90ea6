use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tgcm_common::{
    error::{Result, TgcmError},
    types::{MessageId, Recipient, TelegramId},
};
use tracing::debug;

use crate::sender::{MessageSender, SendError};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct BotApiConfig {
    pub api_base: String,
    pub token: String,
    pub timeout: Duration,
}

impl BotApiConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token: token.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Delivers text messages through the Telegram Bot API `sendMessage` method.
pub struct BotApiSender {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    chat_id: TelegramId,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<SentMessage>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: MessageId,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

impl BotApiSender {
    pub fn new(config: BotApiConfig) -> Result<Self> {
        if config.token.trim().is_empty() {
            return Err(TgcmError::validation("telegram bot token is required"));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| {
                TgcmError::Internal(format!("failed to create telegram client: {err}"))
            })?;

        Ok(Self {
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.token.trim()
            ),
            client,
        })
    }

    pub async fn send(
        &self,
        recipient: &Recipient,
        text: &str,
    ) -> std::result::Result<MessageId, SendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SendMessageBody {
                chat_id: recipient.telegram_id,
                text,
            })
            .send()
            .await
            // the endpoint embeds the bot token
            .map_err(|err| SendError::TransientNetworkError(err.without_url().to_string()))?;

        let status = response.status().as_u16();
        let body = response.json::<ApiResponse>().await.ok();
        debug!(
            contact_id = recipient.contact_id,
            status, "telegram sendMessage answered"
        );

        match body {
            Some(ApiResponse {
                ok: true,
                result: Some(message),
                ..
            }) => Ok(message.message_id),
            body => Err(classify_failure(status, body.as_ref())),
        }
    }
}

#[async_trait]
impl MessageSender for BotApiSender {
    async fn send(
        &self,
        recipient: &Recipient,
        text: &str,
    ) -> std::result::Result<MessageId, SendError> {
        Self::send(self, recipient, text).await
    }
}

fn classify_failure(status: u16, body: Option<&ApiResponse>) -> SendError {
    let code = body.and_then(|body| body.error_code).unwrap_or(status);
    let description = body
        .and_then(|body| body.description.clone())
        .unwrap_or_else(|| format!("telegram returned status {status}"));

    match code {
        429 => SendError::RateLimited {
            retry_after: body
                .and_then(|body| body.parameters.as_ref())
                .and_then(|parameters| parameters.retry_after)
                .map(Duration::from_secs),
        },
        403 => SendError::Blocked,
        400 if is_missing_chat(&description) => SendError::NotFound,
        400..=499 => SendError::PermanentFailure(description),
        // 5xx, or a 2xx whose body could not be read
        _ => SendError::TransientNetworkError(description),
    }
}

fn is_missing_chat(description: &str) -> bool {
    let description = description.to_ascii_lowercase();
    description.contains("chat not found") || description.contains("user not found")
}
