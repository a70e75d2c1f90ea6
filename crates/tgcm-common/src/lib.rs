pub mod error;
pub mod recipients;
pub mod time;
pub mod types;

pub use error::{Result, TgcmError};
pub use recipients::RecipientResolver;
pub use types::{ContactId, MessageId, Recipient, TagId, TelegramId};
