pub mod store;
pub mod system;
pub mod types;

pub use store::ContactStore;
pub use system::ContactSys;
pub use types::{Contact, ContactUpdate, NewContact, NewTag, Tag, TagSummary, TagUpdate};
