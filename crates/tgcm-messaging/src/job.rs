use std::sync::{
    Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Utc};
use tgcm_common::{time::now, types::Recipient};

use crate::types::{FailureKind, FailureRecord, JobSnapshot, JobStatus};

#[derive(Debug)]
struct JobProgress {
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    sent: usize,
    failed: usize,
    failures: Vec<FailureRecord>,
}

/// One bulk-send job. The recipient list and body never change after
/// creation; progress is written only by the job's dispatch loop.
#[derive(Debug)]
pub struct BulkJob {
    id: String,
    message: Arc<str>,
    recipients: Arc<[Recipient]>,
    created_at: DateTime<Utc>,
    cancelled: AtomicBool,
    progress: RwLock<JobProgress>,
}

impl BulkJob {
    pub fn new(id: String, message: String, recipients: Vec<Recipient>) -> Self {
        Self {
            id,
            message: Arc::from(message),
            recipients: Arc::from(recipients),
            created_at: now(),
            cancelled: AtomicBool::new(false),
            progress: RwLock::new(JobProgress {
                status: JobStatus::Pending,
                started_at: None,
                completed_at: None,
                sent: 0,
                failed: 0,
                failures: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message(&self) -> Arc<str> {
        Arc::clone(&self.message)
    }

    pub fn recipients(&self) -> Arc<[Recipient]> {
        Arc::clone(&self.recipients)
    }

    pub fn total(&self) -> usize {
        self.recipients.len()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> JobStatus {
        self.read().status
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns `false` if the job had already finished.
    pub fn request_cancel(&self) -> bool {
        let progress = self.write();
        if progress.status == JobStatus::Completed {
            return false;
        }
        self.cancelled.store(true, Ordering::Release);
        true
    }

    pub fn mark_started(&self) {
        let mut progress = self.write();
        progress.status = JobStatus::InProgress;
        progress.started_at = Some(now());
    }

    pub fn mark_completed(&self) {
        let mut progress = self.write();
        progress.status = JobStatus::Completed;
        progress.completed_at = Some(now());
    }

    pub fn record_sent(&self) {
        self.write().sent += 1;
    }

    pub fn record_failure(&self, recipient: &Recipient, kind: FailureKind, error: String) {
        let mut progress = self.write();
        progress.failed += 1;
        progress.failures.push(FailureRecord {
            contact_id: recipient.contact_id,
            telegram_id: recipient.telegram_id,
            display_name: recipient.display_name.clone(),
            kind,
            error,
        });
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let progress = self.read();
        JobSnapshot {
            job_id: self.id.clone(),
            status: progress.status,
            total: self.total(),
            sent: progress.sent,
            failed: progress.failed,
            in_progress: progress.status != JobStatus::Completed,
            cancelled: self.is_cancelled(),
            failures: progress.failures.clone(),
            message: self.message.to_string(),
            created_at: self.created_at,
            started_at: progress.started_at,
            completed_at: progress.completed_at,
        }
    }

    // Counter updates never panic while holding the lock, so a poisoned guard
    // still holds consistent data.
    fn read(&self) -> RwLockReadGuard<'_, JobProgress> {
        self.progress
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, JobProgress> {
        self.progress
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
