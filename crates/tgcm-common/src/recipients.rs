use async_trait::async_trait;

use crate::{
    error::Result,
    types::{Recipient, TagId},
};

/// Looks up message destinations by tag.
///
/// Implementations return each contact at most once, in a stable order, and
/// must not talk to the messaging provider. Unknown tags are reported as
/// `TgcmError::NotFound`.
#[async_trait]
pub trait RecipientResolver: Send + Sync {
    async fn resolve_recipients(&self, tag_ids: &[TagId]) -> Result<Vec<Recipient>>;
}
