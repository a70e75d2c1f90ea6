pub mod handlers;
pub mod router;
pub mod types;

use std::{sync::Arc, time::Instant};

use tgcm_messaging::BulkMessageCoordinator;
use tgcm_store::ContactSys;

pub use router::app_router;

/// Shared state behind every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    contacts: Arc<ContactSys>,
    coordinator: BulkMessageCoordinator,
    started_at: Instant,
}

impl AppState {
    pub fn new(contacts: Arc<ContactSys>, coordinator: BulkMessageCoordinator) -> Self {
        Self {
            contacts,
            coordinator,
            started_at: Instant::now(),
        }
    }

    pub fn contacts(&self) -> &ContactSys {
        &self.contacts
    }

    pub fn coordinator(&self) -> &BulkMessageCoordinator {
        &self.coordinator
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
