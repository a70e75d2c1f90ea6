pub mod bot;
pub mod sender;

pub use bot::{BotApiConfig, BotApiSender};
pub use sender::{MessageSender, NoopSender, SendError, SendErrorKind};
