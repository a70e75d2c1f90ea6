use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures::{FutureExt, StreamExt, future, stream};
use tgcm_common::{
    error::{Result, TgcmError},
    recipients::RecipientResolver,
    types::{MessageId, Recipient},
};
use tgcm_telegram::{MessageSender, SendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::DispatchConfig,
    job::BulkJob,
    pacer::Pacer,
    types::{
        BulkMessageRequest, DirectSendResult, FailureKind, JobSnapshot, JobStatus, SubmittedJob,
        normalize_message,
    },
};

const CANCELLED_REASON: &str = "job was cancelled before this recipient was attempted";

/// Accepts bulk-send requests, runs each as a background dispatch task and
/// keeps pollable job state keyed by job id.
#[derive(Clone)]
pub struct BulkMessageCoordinator {
    resolver: Arc<dyn RecipientResolver>,
    sender: Arc<dyn MessageSender>,
    config: DispatchConfig,
    jobs: Arc<RwLock<HashMap<String, Arc<BulkJob>>>>,
}

impl BulkMessageCoordinator {
    pub fn new(
        resolver: Arc<dyn RecipientResolver>,
        sender: Arc<dyn MessageSender>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            resolver,
            sender,
            config,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Registers a job and returns without waiting for any send. A job whose
    /// tags resolve to nobody is completed on the spot.
    pub async fn submit(&self, request: BulkMessageRequest) -> Result<SubmittedJob> {
        let (tag_ids, message) = request.normalize()?;
        let recipients = unique_recipients(self.resolver.resolve_recipients(&tag_ids).await?);

        let job = Arc::new(BulkJob::new(
            Uuid::new_v4().to_string(),
            message,
            recipients,
        ));
        if job.total() == 0 {
            job.mark_started();
            job.mark_completed();
        }

        let submitted = SubmittedJob {
            job_id: job.id().to_string(),
            total_contacts: job.total(),
            status: job.status(),
            created_at: job.created_at(),
        };
        self.register(Arc::clone(&job)).await;
        info!(
            job_id = %submitted.job_id,
            tag_ids = ?tag_ids,
            recipients = submitted.total_contacts,
            "bulk message job submitted"
        );

        if submitted.status != JobStatus::Completed {
            let coordinator = self.clone();
            tokio::spawn(async move {
                coordinator.run_job(job).await;
            });
        }

        Ok(submitted)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<JobSnapshot> {
        let job = self.jobs.read().await.get(job_id).cloned();
        job.map(|job| job.snapshot())
            .ok_or_else(|| job_not_found(job_id))
    }

    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        let jobs: Vec<Arc<BulkJob>> = self.jobs.read().await.values().cloned().collect();
        let mut snapshots: Vec<JobSnapshot> = jobs.iter().map(|job| job.snapshot()).collect();
        snapshots.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        snapshots
    }

    /// Stops scheduling further sends. Sends already in flight finish and are
    /// counted; recipients never attempted are recorded as cancelled failures.
    /// Cancelling a finished job is a no-op.
    pub async fn cancel(&self, job_id: &str) -> Result<JobSnapshot> {
        let job = self
            .jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| job_not_found(job_id))?;

        if job.request_cancel() {
            info!(job_id, "bulk message job cancellation requested");
        }
        Ok(job.snapshot())
    }

    /// Sends one message outside of any job.
    pub async fn send_direct(&self, recipient: Recipient, text: &str) -> Result<DirectSendResult> {
        let text: Arc<str> = Arc::from(normalize_message(text)?);
        let contact_id = recipient.contact_id;
        let contact_name = recipient.display_name.clone();

        let result = match deliver(Arc::clone(&self.sender), recipient, text).await {
            Ok(message_id) => DirectSendResult {
                contact_id,
                contact_name,
                success: true,
                message_id: Some(message_id),
                error_kind: None,
                error: None,
            },
            Err(err) => {
                warn!(contact_id, error = %err, "direct message delivery failed");
                DirectSendResult {
                    contact_id,
                    contact_name,
                    success: false,
                    message_id: None,
                    error_kind: Some(err.kind().into()),
                    error: Some(err.to_string()),
                }
            }
        };
        Ok(result)
    }

    async fn register(&self, job: Arc<BulkJob>) {
        let mut jobs = self.jobs.write().await;
        let job_id = job.id().to_string();
        jobs.insert(job_id.clone(), job);
        prune_finished(&mut jobs, self.config.max_retained_jobs, &job_id);
    }

    async fn run_job(&self, job: Arc<BulkJob>) {
        job.mark_started();

        let pacer = Pacer::new(self.config.send_interval);
        let recipients = job.recipients();
        let text = job.message();

        stream::iter(recipients.iter())
            .map(|recipient| self.attempt(&job, recipient, Arc::clone(&text), &pacer))
            .buffer_unordered(self.config.max_in_flight.max(1))
            .for_each(|()| future::ready(()))
            .boxed()
            .await;

        job.mark_completed();
        let snapshot = job.snapshot();
        info!(
            job_id = %snapshot.job_id,
            sent = snapshot.sent,
            failed = snapshot.failed,
            cancelled = snapshot.cancelled,
            "bulk message job completed"
        );
    }

    async fn attempt(&self, job: &BulkJob, recipient: &Recipient, text: Arc<str>, pacer: &Pacer) {
        if job.is_cancelled() {
            job.record_failure(recipient, FailureKind::Cancelled, CANCELLED_REASON.to_string());
            return;
        }

        pacer.wait_turn().await;
        if job.is_cancelled() {
            job.record_failure(recipient, FailureKind::Cancelled, CANCELLED_REASON.to_string());
            return;
        }

        match deliver(Arc::clone(&self.sender), recipient.clone(), text).await {
            Ok(message_id) => {
                job.record_sent();
                debug!(
                    job_id = job.id(),
                    contact_id = recipient.contact_id,
                    message_id,
                    "message delivered"
                );
            }
            Err(err) => {
                if let SendError::RateLimited { retry_after } = &err {
                    pacer.defer(retry_after.unwrap_or(self.config.rate_limit_backoff));
                }
                warn!(
                    job_id = job.id(),
                    contact_id = recipient.contact_id,
                    error = %err,
                    "message delivery failed"
                );
                job.record_failure(recipient, err.kind().into(), err.to_string());
            }
        }
    }
}

/// Runs the send on its own task so a panicking sender surfaces as a
/// transient failure of this recipient only.
async fn deliver(
    sender: Arc<dyn MessageSender>,
    recipient: Recipient,
    text: Arc<str>,
) -> std::result::Result<MessageId, SendError> {
    let task = tokio::spawn(async move { sender.send(&recipient, &text).await });
    match task.await {
        Ok(outcome) => outcome,
        Err(err) => Err(SendError::TransientNetworkError(format!(
            "send task failed: {err}"
        ))),
    }
}

fn unique_recipients(recipients: Vec<Recipient>) -> Vec<Recipient> {
    let mut seen = HashSet::with_capacity(recipients.len());
    recipients
        .into_iter()
        .filter(|recipient| seen.insert(recipient.contact_id))
        .collect()
}

fn prune_finished(jobs: &mut HashMap<String, Arc<BulkJob>>, max_retained: usize, keep: &str) {
    if jobs.len() <= max_retained {
        return;
    }

    let mut finished: Vec<(chrono::DateTime<chrono::Utc>, String)> = jobs
        .values()
        .filter(|job| job.id() != keep && job.status() == JobStatus::Completed)
        .map(|job| (job.created_at(), job.id().to_string()))
        .collect();
    finished.sort();

    let excess = jobs.len() - max_retained;
    for (_, job_id) in finished.into_iter().take(excess) {
        jobs.remove(&job_id);
        debug!(job_id = %job_id, "evicted finished bulk message job");
    }
}

fn job_not_found(job_id: &str) -> TgcmError {
    TgcmError::NotFound(format!("bulk message job not found: {job_id}"))
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use tgcm_common::{
        error::{Result, TgcmError},
        recipients::RecipientResolver,
        types::{ContactId, MessageId, Recipient, TagId},
    };
    use tgcm_telegram::{MessageSender, SendError};
    use tokio::{sync::Semaphore, time::Instant};

    use super::BulkMessageCoordinator;
    use crate::{
        config::DispatchConfig,
        types::{BulkMessageRequest, FailureKind, JobSnapshot, JobStatus, MAX_MESSAGE_CHARS},
    };

    fn recipient(id: ContactId) -> Recipient {
        Recipient {
            contact_id: id,
            telegram_id: 1000 + id,
            display_name: format!("Contact {id}"),
        }
    }

    /// Concatenates per-tag lists without deduplicating them.
    struct TagResolver {
        tags: HashMap<TagId, Vec<Recipient>>,
    }

    impl TagResolver {
        fn new(tags: Vec<(TagId, Vec<ContactId>)>) -> Self {
            Self {
                tags: tags
                    .into_iter()
                    .map(|(tag, ids)| (tag, ids.into_iter().map(recipient).collect()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl RecipientResolver for TagResolver {
        async fn resolve_recipients(&self, tag_ids: &[TagId]) -> Result<Vec<Recipient>> {
            let mut resolved = Vec::new();
            for tag_id in tag_ids {
                let recipients = self
                    .tags
                    .get(tag_id)
                    .ok_or_else(|| TgcmError::not_found(format!("tag not found: {tag_id}")))?;
                resolved.extend(recipients.iter().cloned());
            }
            Ok(resolved)
        }
    }

    #[derive(Default)]
    struct StubSender {
        attempts: Mutex<Vec<(ContactId, Instant)>>,
        failures: HashMap<ContactId, SendError>,
        panic_for: Option<ContactId>,
        gate: Option<Arc<Semaphore>>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl StubSender {
        fn attempted(&self) -> Vec<ContactId> {
            let mut ids: Vec<ContactId> = self
                .attempts
                .lock()
                .unwrap()
                .iter()
                .map(|(id, _)| *id)
                .collect();
            ids.sort();
            ids
        }
    }

    #[async_trait]
    impl MessageSender for StubSender {
        async fn send(
            &self,
            recipient: &Recipient,
            _text: &str,
        ) -> std::result::Result<MessageId, SendError> {
            self.attempts
                .lock()
                .unwrap()
                .push((recipient.contact_id, Instant::now()));
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panic_for == Some(recipient.contact_id) {
                panic!("sender blew up");
            }
            match self.failures.get(&recipient.contact_id) {
                Some(err) => Err(err.clone()),
                None => Ok(recipient.contact_id * 10),
            }
        }
    }

    fn coordinator(
        resolver: TagResolver,
        sender: Arc<StubSender>,
        max_in_flight: usize,
    ) -> BulkMessageCoordinator {
        BulkMessageCoordinator::new(
            Arc::new(resolver),
            sender,
            DispatchConfig {
                max_in_flight,
                send_interval: Duration::ZERO,
                rate_limit_backoff: Duration::from_millis(10),
                max_retained_jobs: 100,
            },
        )
    }

    fn request(tag_ids: &[TagId], message: &str) -> BulkMessageRequest {
        BulkMessageRequest {
            tag_ids: tag_ids.to_vec(),
            message: message.to_string(),
        }
    }

    async fn wait_until_completed(
        coordinator: &BulkMessageCoordinator,
        job_id: &str,
    ) -> JobSnapshot {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snapshot = coordinator.get_status(job_id).await.unwrap();
                assert!(snapshot.sent + snapshot.failed <= snapshot.total);
                assert_eq!(snapshot.failures.len(), snapshot.failed);
                if snapshot.status == JobStatus::Completed {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job did not complete in time")
    }

    async fn wait_for_attempts(sender: &StubSender, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while sender.attempts.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("sender was not reached in time");
    }

    #[tokio::test]
    async fn overlapping_tags_receive_one_message_each() {
        let sender = Arc::new(StubSender::default());
        let coordinator = coordinator(
            TagResolver::new(vec![(1, vec![1, 2, 3]), (2, vec![3, 4])]),
            Arc::clone(&sender),
            2,
        );

        let job = coordinator.submit(request(&[1, 2], "hi")).await.unwrap();
        assert_eq!(job.total_contacts, 4);

        let snapshot = wait_until_completed(&coordinator, &job.job_id).await;
        assert_eq!(snapshot.sent, 4);
        assert_eq!(snapshot.failed, 0);
        assert!(snapshot.completed_at.is_some());
        assert_eq!(sender.attempted(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn submit_returns_before_sends_finish() {
        let gate = Arc::new(Semaphore::new(0));
        let sender = Arc::new(StubSender {
            gate: Some(Arc::clone(&gate)),
            ..StubSender::default()
        });
        let coordinator = coordinator(TagResolver::new(vec![(1, vec![1, 2])]), sender, 1);

        let job = coordinator.submit(request(&[1], "hello")).await.unwrap();
        let snapshot = coordinator.get_status(&job.job_id).await.unwrap();
        assert!(snapshot.in_progress);
        assert_eq!(snapshot.sent, 0);

        gate.add_permits(2);
        let snapshot = wait_until_completed(&coordinator, &job.job_id).await;
        assert_eq!(snapshot.sent, 2);
        assert!(!snapshot.in_progress);
    }

    #[tokio::test]
    async fn one_failing_recipient_does_not_stop_the_job() {
        let sender = Arc::new(StubSender {
            failures: HashMap::from([(2, SendError::Blocked)]),
            ..StubSender::default()
        });
        let coordinator = coordinator(
            TagResolver::new(vec![(1, vec![1, 2, 3, 4])]),
            Arc::clone(&sender),
            1,
        );

        let job = coordinator.submit(request(&[1], "hi")).await.unwrap();
        let snapshot = wait_until_completed(&coordinator, &job.job_id).await;

        assert_eq!(snapshot.sent, 3);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.failures[0].contact_id, 2);
        assert_eq!(snapshot.failures[0].display_name, "Contact 2");
        assert_eq!(snapshot.failures[0].kind, FailureKind::Blocked);
        assert_eq!(sender.attempted(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn panicking_sender_is_recorded_as_transient_failure() {
        let sender = Arc::new(StubSender {
            panic_for: Some(1),
            ..StubSender::default()
        });
        let coordinator = coordinator(
            TagResolver::new(vec![(1, vec![1, 2, 3])]),
            Arc::clone(&sender),
            1,
        );

        let job = coordinator.submit(request(&[1], "hi")).await.unwrap();
        let snapshot = wait_until_completed(&coordinator, &job.job_id).await;

        assert_eq!(snapshot.sent, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(
            snapshot.failures[0].kind,
            FailureKind::TransientNetworkError
        );
    }

    #[tokio::test]
    async fn empty_recipient_set_completes_immediately() {
        let sender = Arc::new(StubSender::default());
        let coordinator = coordinator(TagResolver::new(vec![(1, vec![])]), Arc::clone(&sender), 1);

        let job = coordinator.submit(request(&[1], "hi")).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let snapshot = coordinator.get_status(&job.job_id).await.unwrap();
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.sent + snapshot.failed, 0);
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.completed_at.is_some());
        assert!(sender.attempted().is_empty());
    }

    #[tokio::test]
    async fn request_validation_boundaries() {
        let coordinator = coordinator(
            TagResolver::new(vec![(1, vec![])]),
            Arc::new(StubSender::default()),
            1,
        );

        assert!(matches!(
            coordinator.submit(request(&[], "hi")).await,
            Err(TgcmError::Validation(_))
        ));
        assert!(matches!(
            coordinator.submit(request(&[1], "")).await,
            Err(TgcmError::Validation(_))
        ));
        assert!(matches!(
            coordinator
                .submit(request(&[1], &"x".repeat(MAX_MESSAGE_CHARS + 1)))
                .await,
            Err(TgcmError::Validation(_))
        ));
        assert!(
            coordinator
                .submit(request(&[1], &"x".repeat(MAX_MESSAGE_CHARS)))
                .await
                .is_ok()
        );
        assert!(matches!(
            coordinator.submit(request(&[7], "hi")).await,
            Err(TgcmError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_job_ids_are_not_found() {
        let coordinator = coordinator(
            TagResolver::new(vec![]),
            Arc::new(StubSender::default()),
            1,
        );

        assert!(matches!(
            coordinator.get_status("missing").await,
            Err(TgcmError::NotFound(_))
        ));
        assert!(matches!(
            coordinator.cancel("missing").await,
            Err(TgcmError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn resubmission_targets_the_same_recipients() {
        let sender = Arc::new(StubSender::default());
        let coordinator = coordinator(
            TagResolver::new(vec![(1, vec![1, 2]), (2, vec![2, 3])]),
            Arc::clone(&sender),
            2,
        );

        let first = coordinator.submit(request(&[1, 2], "hi")).await.unwrap();
        let second = coordinator.submit(request(&[1, 2], "hi")).await.unwrap();
        assert_ne!(first.job_id, second.job_id);
        assert_eq!(first.total_contacts, second.total_contacts);

        wait_until_completed(&coordinator, &first.job_id).await;
        wait_until_completed(&coordinator, &second.job_id).await;
        assert_eq!(sender.attempted(), vec![1, 1, 2, 2, 3, 3]);
    }

    #[tokio::test]
    async fn in_flight_sends_stay_within_bound() {
        let ids: Vec<ContactId> = (1..=12).collect();
        let sender = Arc::new(StubSender {
            delay: Duration::from_millis(15),
            ..StubSender::default()
        });
        let coordinator = coordinator(
            TagResolver::new(vec![(1, ids)]),
            Arc::clone(&sender),
            3,
        );

        let job = coordinator.submit(request(&[1], "hi")).await.unwrap();
        let snapshot = wait_until_completed(&coordinator, &job.job_id).await;

        assert_eq!(snapshot.sent, 12);
        let peak = sender.peak_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight sends was {peak}");
        assert!(peak > 1, "sends never overlapped");
    }

    #[tokio::test]
    async fn rate_limit_delays_the_next_recipient() {
        let sender = Arc::new(StubSender {
            failures: HashMap::from([(
                1,
                SendError::RateLimited {
                    retry_after: Some(Duration::from_millis(60)),
                },
            )]),
            ..StubSender::default()
        });
        let coordinator = coordinator(
            TagResolver::new(vec![(1, vec![1, 2])]),
            Arc::clone(&sender),
            1,
        );

        let job = coordinator.submit(request(&[1], "hi")).await.unwrap();
        let snapshot = wait_until_completed(&coordinator, &job.job_id).await;

        assert_eq!(snapshot.sent, 1);
        assert_eq!(snapshot.failures[0].kind, FailureKind::RateLimited);

        let attempts = sender.attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1].1 - attempts[0].1 >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancel_finishes_in_flight_send_and_skips_the_rest() {
        let gate = Arc::new(Semaphore::new(0));
        let sender = Arc::new(StubSender {
            gate: Some(Arc::clone(&gate)),
            ..StubSender::default()
        });
        let coordinator = coordinator(
            TagResolver::new(vec![(1, vec![1, 2, 3, 4, 5])]),
            Arc::clone(&sender),
            1,
        );

        let job = coordinator.submit(request(&[1], "hi")).await.unwrap();
        wait_for_attempts(&sender, 1).await;

        let snapshot = coordinator.cancel(&job.job_id).await.unwrap();
        assert!(snapshot.cancelled);
        assert!(snapshot.in_progress);

        gate.add_permits(5);
        let snapshot = wait_until_completed(&coordinator, &job.job_id).await;
        assert_eq!(snapshot.sent, 1);
        assert_eq!(snapshot.failed, 4);
        assert!(
            snapshot
                .failures
                .iter()
                .all(|failure| failure.kind == FailureKind::Cancelled)
        );
        assert_eq!(sender.attempted(), vec![1]);

        let again = coordinator.cancel(&job.job_id).await.unwrap();
        assert_eq!(again.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn finished_jobs_are_evicted_oldest_first() {
        let sender = Arc::new(StubSender::default());
        let coordinator = BulkMessageCoordinator::new(
            Arc::new(TagResolver::new(vec![(1, vec![])])),
            sender,
            DispatchConfig {
                max_retained_jobs: 2,
                ..DispatchConfig::default()
            },
        );

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(coordinator.submit(request(&[1], "hi")).await.unwrap().job_id);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert!(matches!(
            coordinator.get_status(&ids[0]).await,
            Err(TgcmError::NotFound(_))
        ));
        let listed: Vec<String> = coordinator
            .list_jobs()
            .await
            .into_iter()
            .map(|job| job.job_id)
            .collect();
        assert_eq!(listed, vec![ids[2].clone(), ids[1].clone()]);
    }

    #[tokio::test]
    async fn direct_send_reports_outcome() {
        let sender = Arc::new(StubSender {
            failures: HashMap::from([(2, SendError::NotFound)]),
            ..StubSender::default()
        });
        let coordinator = coordinator(TagResolver::new(vec![]), sender, 1);

        let delivered = coordinator.send_direct(recipient(1), " hi ").await.unwrap();
        assert!(delivered.success);
        assert_eq!(delivered.message_id, Some(10));

        let failed = coordinator.send_direct(recipient(2), "hi").await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error_kind, Some(FailureKind::NotFound));

        assert!(matches!(
            coordinator.send_direct(recipient(1), "  ").await,
            Err(TgcmError::Validation(_))
        ));
    }
}
