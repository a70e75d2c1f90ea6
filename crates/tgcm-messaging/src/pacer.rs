use std::{sync::Mutex, time::Duration};

use tokio::time::Instant;

/// Spaces out send starts within one job and absorbs rate-limit backoff.
///
/// Every caller of [`Pacer::wait_turn`] reserves the next free slot, so with
/// an interval `d` consecutive sends start at least `d` apart no matter how
/// many workers are in flight. [`Pacer::defer`] pushes the next free slot
/// back, delaying every send that has not reserved a slot yet.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub async fn wait_turn(&self) {
        let slot = {
            let mut next_slot = self
                .next_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let slot = (*next_slot).max(Instant::now());
            *next_slot = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    pub fn defer(&self, delay: Duration) {
        let resume_at = Instant::now() + delay;
        let mut next_slot = self
            .next_slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if resume_at > *next_slot {
            *next_slot = resume_at;
        }
    }
}
