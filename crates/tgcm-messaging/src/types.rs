use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tgcm_common::{
    error::{Result, TgcmError},
    types::{ContactId, MessageId, TagId, TelegramId},
};
use tgcm_telegram::SendErrorKind;

/// Telegram caps a text message at 4096 characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    Blocked,
    NotFound,
    PermanentFailure,
    TransientNetworkError,
    Cancelled,
}

impl From<SendErrorKind> for FailureKind {
    fn from(kind: SendErrorKind) -> Self {
        match kind {
            SendErrorKind::RateLimited => Self::RateLimited,
            SendErrorKind::Blocked => Self::Blocked,
            SendErrorKind::NotFound => Self::NotFound,
            SendErrorKind::PermanentFailure => Self::PermanentFailure,
            SendErrorKind::TransientNetworkError => Self::TransientNetworkError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub contact_id: ContactId,
    pub telegram_id: TelegramId,
    pub display_name: String,
    pub kind: FailureKind,
    pub error: String,
}

/// Point-in-time view of a bulk job. `sent + failed <= total` and
/// `failures.len() == failed` in every snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub in_progress: bool,
    pub cancelled: bool,
    pub failures: Vec<FailureRecord>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedJob {
    pub job_id: String,
    pub total_contacts: usize,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkMessageRequest {
    pub tag_ids: Vec<TagId>,
    pub message: String,
}

impl BulkMessageRequest {
    /// Returns the tag ids with duplicates dropped (first occurrence wins) and
    /// the trimmed message body.
    pub fn normalize(self) -> Result<(Vec<TagId>, String)> {
        if self.tag_ids.is_empty() {
            return Err(TgcmError::validation(
                "at least one tag id must be provided",
            ));
        }
        if self.tag_ids.iter().any(|id| *id <= 0) {
            return Err(TgcmError::validation("tag ids must be positive integers"));
        }

        let mut tag_ids = Vec::with_capacity(self.tag_ids.len());
        for id in self.tag_ids {
            if !tag_ids.contains(&id) {
                tag_ids.push(id);
            }
        }

        Ok((tag_ids, normalize_message(&self.message)?))
    }
}

pub fn normalize_message(message: &str) -> Result<String> {
    let message = message.trim();
    if message.is_empty() {
        return Err(TgcmError::validation(
            "message cannot be empty or only whitespace",
        ));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(TgcmError::validation(format!(
            "message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(message.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectSendResult {
    pub contact_id: ContactId,
    pub contact_name: String,
    pub success: bool,
    pub message_id: Option<MessageId>,
    pub error_kind: Option<FailureKind>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use tgcm_common::error::TgcmError;

    use super::{BulkMessageRequest, MAX_MESSAGE_CHARS, normalize_message};

    fn request(tag_ids: Vec<i64>, message: &str) -> BulkMessageRequest {
        BulkMessageRequest {
            tag_ids,
            message: message.to_string(),
        }
    }

    #[test]
    fn message_length_boundary() {
        assert!(normalize_message(&"a".repeat(MAX_MESSAGE_CHARS)).is_ok());
        assert!(matches!(
            normalize_message(&"a".repeat(MAX_MESSAGE_CHARS + 1)),
            Err(TgcmError::Validation(_))
        ));
        // counted in characters, not bytes
        assert!(normalize_message(&"é".repeat(MAX_MESSAGE_CHARS)).is_ok());
    }

    #[test]
    fn blank_messages_are_rejected() {
        assert!(matches!(
            normalize_message(""),
            Err(TgcmError::Validation(_))
        ));
        assert!(matches!(
            normalize_message(" \n\t "),
            Err(TgcmError::Validation(_))
        ));
        assert_eq!(normalize_message("  hi  ").unwrap(), "hi");
    }

    #[test]
    fn tag_ids_are_required_positive_and_deduplicated() {
        assert!(matches!(
            request(vec![], "hi").normalize(),
            Err(TgcmError::Validation(_))
        ));
        assert!(matches!(
            request(vec![1, 0], "hi").normalize(),
            Err(TgcmError::Validation(_))
        ));

        let (tag_ids, message) = request(vec![3, 1, 3, 2, 1], " hi ").normalize().unwrap();
        assert_eq!(tag_ids, vec![3, 1, 2]);
        assert_eq!(message, "hi");
    }
}
