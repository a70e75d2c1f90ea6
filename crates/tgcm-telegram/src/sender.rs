use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tgcm_common::types::{MessageId, Recipient};

/// Outcome of a failed delivery, classified at the sender boundary so callers
/// never inspect transport errors themselves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("rate limited by telegram")]
    RateLimited { retry_after: Option<Duration> },
    #[error("recipient has blocked the sender")]
    Blocked,
    #[error("recipient chat not found")]
    NotFound,
    #[error("permanent failure: {0}")]
    PermanentFailure(String),
    #[error("transient network error: {0}")]
    TransientNetworkError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendErrorKind {
    RateLimited,
    Blocked,
    NotFound,
    PermanentFailure,
    TransientNetworkError,
}

impl SendError {
    pub fn kind(&self) -> SendErrorKind {
        match self {
            Self::RateLimited { .. } => SendErrorKind::RateLimited,
            Self::Blocked => SendErrorKind::Blocked,
            Self::NotFound => SendErrorKind::NotFound,
            Self::PermanentFailure(_) => SendErrorKind::PermanentFailure,
            Self::TransientNetworkError(_) => SendErrorKind::TransientNetworkError,
        }
    }
}

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, recipient: &Recipient, text: &str) -> Result<MessageId, SendError>;
}

/// Sender used when no bot credentials are configured.
#[derive(Debug, Clone, Default)]
pub struct NoopSender;

#[async_trait]
impl MessageSender for NoopSender {
    async fn send(&self, _recipient: &Recipient, _text: &str) -> Result<MessageId, SendError> {
        Err(SendError::PermanentFailure(
            "telegram sender is not configured".to_string(),
        ))
    }
}
