use serde::{Deserialize, Serialize};

pub type ContactId = i64;
pub type TagId = i64;
pub type TelegramId = i64;
pub type MessageId = i64;

/// Destination of a single send, captured when a bulk job resolves its
/// recipient set. Identity is the contact id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub contact_id: ContactId,
    pub telegram_id: TelegramId,
    pub display_name: String,
}
