use serde::{Deserialize, Serialize};
use tgcm_common::types::{ContactId, TagId};
use tgcm_store::{Contact, Tag};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// A contact together with the tags it carries.
#[derive(Debug, Clone, Serialize)]
pub struct ContactView {
    #[serde(flatten)]
    pub contact: Contact,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagAssignment {
    pub contact_id: ContactId,
    pub tag_id: TagId,
    pub changed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub contact_id: ContactId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub max_in_flight: usize,
    pub send_interval_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}
