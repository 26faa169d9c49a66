use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use vidiary_blob::ObjectStore;
use vidiary_core::{JobId, JobUpdate};
use vidiary_state::{IdempotencyGuard, JobStore};

use crate::launcher::{LaunchSpec, TaskLauncher};
use crate::message::{parse_message, ParsedMessage};
use crate::queue::{MessageQueue, QueueMessage};
use crate::{DispatchError, DispatchResult};

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub dispatched: usize,
}

/// Single-threaded queue consumer: each message is processed to completion
/// before the next begins, which keeps the delete ordering trivial to reason
/// about.
pub struct Dispatcher {
    queue: Arc<dyn MessageQueue>,
    objects: Arc<dyn ObjectStore>,
    jobs: Arc<dyn JobStore>,
    guard: Arc<dyn IdempotencyGuard>,
    launcher: Arc<dyn TaskLauncher>,
    default_bucket: String,
    jobs_table: String,
    idempotency_table: String,
    idle_wait: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        objects: Arc<dyn ObjectStore>,
        jobs: Arc<dyn JobStore>,
        guard: Arc<dyn IdempotencyGuard>,
        launcher: Arc<dyn TaskLauncher>,
        default_bucket: impl Into<String>,
        jobs_table: impl Into<String>,
        idempotency_table: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            objects,
            jobs,
            guard,
            launcher,
            default_bucket: default_bucket.into(),
            jobs_table: jobs_table.into(),
            idempotency_table: idempotency_table.into(),
            idle_wait: Duration::from_secs(1),
        }
    }

    /// Run forever, sleeping briefly when the queue is empty.
    pub async fn run(&self) -> DispatchResult<()> {
        loop {
            match self.run_once().await {
                Ok(outcome) => {
                    if outcome.dispatched == 0 {
                        tokio::time::sleep(self.idle_wait).await;
                    }
                }
                Err(err) => {
                    warn!(%err, "dispatch pass failed");
                    tokio::time::sleep(self.idle_wait).await;
                }
            }
        }
    }

    /// Receive one batch and process each message to completion. A message
    /// that fails mid-algorithm is left on the queue for redelivery; the
    /// pass continues with the next message.
    pub async fn run_once(&self) -> DispatchResult<DispatchOutcome> {
        let messages = self.queue.receive(10).await?;
        if messages.is_empty() {
            return Ok(DispatchOutcome { dispatched: 0 });
        }

        let mut dispatched = 0;
        for message in messages {
            match self.process_message(&message).await {
                Ok(true) => dispatched += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(%err, "message dispatch failed, leaving for redelivery");
                }
            }
        }
        Ok(DispatchOutcome { dispatched })
    }

    /// Per-message algorithm. Returns `Ok(true)` when an executor was
    /// launched, `Ok(false)` when the message was discarded without
    /// dispatching, and `Err` when the message must stay on the queue.
    #[instrument(skip(self, message))]
    async fn process_message(&self, message: &QueueMessage) -> DispatchResult<bool> {
        // Deterministically malformed bodies are removed; redelivery cannot
        // fix them.
        let parsed = match parse_message(&message.body, &self.default_bucket) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(%err, "discarding malformed message");
                self.queue.delete(&message.receipt_handle).await?;
                return Ok(false);
            }
        };

        let (job_id, object_key, object_bucket) = match &parsed {
            ParsedMessage::Confirmation {
                job_id,
                object_key,
                object_bucket,
            } => (job_id.clone(), object_key.clone(), object_bucket.clone()),
            ParsedMessage::UploadEvent {
                object_key,
                object_bucket,
            } => {
                // Only confirm-created job ids are dispatched; the upload
                // event either adopts one or waits for the confirmation.
                match self.jobs.find_queued_by_object_key(object_key).await? {
                    Some(job_id) => {
                        info!(%job_id, object_key, "upload event adopted queued job");
                        (job_id, object_key.clone(), object_bucket.clone())
                    }
                    None => {
                        info!(object_key, "no queued job for upload event yet, waiting for confirmation");
                        self.queue.delete(&message.receipt_handle).await?;
                        return Ok(false);
                    }
                }
            }
        };

        // Resolve the object version. Failure here propagates: the message
        // becomes visible again and the DLQ catches repeat offenders.
        let head = self
            .objects
            .head(&object_key, Some(&object_bucket))
            .await?
            .ok_or_else(|| DispatchError::object_missing(&object_key))?;
        let object_version = head.version.unwrap_or_default();

        if self.guard.is_processed(&object_key, &object_version).await? {
            info!(object_key, "tuple already processed, discarding message");
            self.queue.delete(&message.receipt_handle).await?;
            return Ok(false);
        }

        if !self.guard.claim(&object_key, &object_version).await? {
            info!(object_key, "claim already held, discarding duplicate");
            self.queue.delete(&message.receipt_handle).await?;
            return Ok(false);
        }

        // The confirmation path may have created the record already; that is
        // success, not conflict.
        self.jobs
            .create(&job_id, &object_key, &object_bucket, Some(&object_version))
            .await?;

        let spec = LaunchSpec {
            job_id: job_id.clone(),
            object_key: object_key.clone(),
            object_bucket: object_bucket.clone(),
            jobs_table: self.jobs_table.clone(),
            idempotency_table: self.idempotency_table.clone(),
        };
        // A launch failure leaves the message on the queue; redelivery finds
        // the claim held and discards itself only after a successful launch
        // elsewhere, so nothing is lost and nothing runs twice.
        let task_handle = self.launcher.launch(&spec).await?;

        if let Err(err) = self
            .jobs
            .update(&job_id, JobUpdate::new().task_handle(task_handle.clone()))
            .await
        {
            warn!(%job_id, %err, "recording task handle failed");
        }

        self.queue.delete(&message.receipt_handle).await?;
        info!(%job_id, task_handle, "dispatched job");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use vidiary_blob::MemoryObjectStore;
    use vidiary_state::{ClaimStatus, MemoryIdempotencyGuard, MemoryJobStore};

    use crate::queue::MemoryQueue;

    struct FakeLauncher {
        launches: Mutex<Vec<LaunchSpec>>,
        fail: bool,
    }

    impl FakeLauncher {
        fn new() -> Self {
            Self {
                launches: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                launches: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        async fn count(&self) -> usize {
            self.launches.lock().await.len()
        }
    }

    #[async_trait]
    impl TaskLauncher for FakeLauncher {
        async fn launch(&self, spec: &LaunchSpec) -> DispatchResult<String> {
            if self.fail {
                return Err(DispatchError::launch_failed("no capacity"));
            }
            let mut launches = self.launches.lock().await;
            launches.push(spec.clone());
            Ok(format!("task-{}", launches.len()))
        }
    }

    struct Harness {
        queue: Arc<MemoryQueue>,
        objects: Arc<MemoryObjectStore>,
        jobs: Arc<MemoryJobStore>,
        guard: Arc<MemoryIdempotencyGuard>,
        launcher: Arc<FakeLauncher>,
        dispatcher: Dispatcher,
    }

    fn harness_with(launcher: FakeLauncher) -> Harness {
        let queue = Arc::new(MemoryQueue::new());
        let objects = Arc::new(MemoryObjectStore::new("bucket"));
        let jobs = Arc::new(MemoryJobStore::new());
        let guard = Arc::new(MemoryIdempotencyGuard::new());
        let launcher = Arc::new(launcher);
        let dispatcher = Dispatcher::new(
            queue.clone(),
            objects.clone(),
            jobs.clone(),
            guard.clone(),
            launcher.clone(),
            "bucket",
            "jobs-table",
            "idem-table",
        );
        Harness {
            queue,
            objects,
            jobs,
            guard,
            launcher,
            dispatcher,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeLauncher::new())
    }

    fn confirmation(job_id: &str, key: &str) -> String {
        format!(r#"{{"job_id":"{job_id}","object_key":"{key}","object_bucket":"bucket"}}"#)
    }

    fn upload_event(key: &str) -> String {
        format!(
            r#"{{"Records":[{{"s3":{{"bucket":{{"name":"bucket"}},"object":{{"key":"{key}"}}}}}}]}}"#
        )
    }

    #[tokio::test]
    async fn empty_queue_dispatches_zero() {
        let h = harness();
        let outcome = h.dispatcher.run_once().await.unwrap();
        assert_eq!(outcome.dispatched, 0);
    }

    #[tokio::test]
    async fn confirmation_dispatches_and_deletes() {
        let h = harness();
        h.objects
            .put_bytes("uploads/v.mp4", b"video bytes".to_vec(), Some("video/mp4"))
            .await;
        h.queue.push(confirmation("j1", "uploads/v.mp4")).await;

        let outcome = h.dispatcher.run_once().await.unwrap();
        assert_eq!(outcome.dispatched, 1);
        assert!(h.queue.is_empty().await);
        assert_eq!(h.launcher.count().await, 1);

        let job = h.jobs.get(&JobId::from("j1")).await.unwrap().unwrap();
        assert_eq!(job.object_key, "uploads/v.mp4");
        assert!(job.task_handle.is_some());
        assert!(job.object_version.is_some());

        let record = h
            .guard
            .record("uploads/v.mp4", job.object_version.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(record.status, ClaimStatus::Dispatched);
    }

    #[tokio::test]
    async fn duplicate_delivery_dispatches_once() {
        let h = harness();
        h.objects
            .put_bytes("uploads/v.mp4", b"video bytes".to_vec(), None)
            .await;
        h.queue.push(confirmation("j1", "uploads/v.mp4")).await;
        h.queue.push(confirmation("j1", "uploads/v.mp4")).await;

        let outcome = h.dispatcher.run_once().await.unwrap();
        assert_eq!(outcome.dispatched, 1);
        assert_eq!(h.launcher.count().await, 1);
        // The duplicate found the claim held and deleted itself
        assert!(h.queue.is_empty().await);
        assert_eq!(h.jobs.len().await, 1);
    }

    #[tokio::test]
    async fn upload_event_without_job_waits_for_confirmation() {
        let h = harness();
        h.objects
            .put_bytes("uploads/v.mp4", b"video bytes".to_vec(), None)
            .await;
        h.queue.push(upload_event("uploads/v.mp4")).await;

        let outcome = h.dispatcher.run_once().await.unwrap();
        assert_eq!(outcome.dispatched, 0);
        assert!(h.queue.is_empty().await);
        assert_eq!(h.launcher.count().await, 0);
        assert!(h.jobs.is_empty().await);
    }

    #[tokio::test]
    async fn confirmation_then_event_runs_once() {
        let h = harness();
        h.objects
            .put_bytes("uploads/k2.mp4", b"video bytes".to_vec(), None)
            .await;

        // Confirmation arrives first and dispatches j2
        h.queue.push(confirmation("j2", "uploads/k2.mp4")).await;
        let outcome = h.dispatcher.run_once().await.unwrap();
        assert_eq!(outcome.dispatched, 1);

        // The upload event arrives second: it adopts j2, finds the claim
        // held, and deletes itself
        h.queue.push(upload_event("uploads/k2.mp4")).await;
        let outcome = h.dispatcher.run_once().await.unwrap();
        assert_eq!(outcome.dispatched, 0);
        assert!(h.queue.is_empty().await);
        assert_eq!(h.launcher.count().await, 1);
        assert_eq!(h.jobs.len().await, 1);
    }

    #[tokio::test]
    async fn launch_failure_leaves_message_for_redelivery() {
        let h = harness_with(FakeLauncher::failing());
        h.objects
            .put_bytes("uploads/v.mp4", b"video bytes".to_vec(), None)
            .await;
        h.queue.push(confirmation("j1", "uploads/v.mp4")).await;

        let outcome = h.dispatcher.run_once().await.unwrap();
        assert_eq!(outcome.dispatched, 0);
        // Message stays; the claim is held for the redelivered attempt
        assert_eq!(h.queue.len().await, 1);
        let job = h.jobs.get(&JobId::from("j1")).await.unwrap().unwrap();
        assert!(job.task_handle.is_none());
    }

    #[tokio::test]
    async fn missing_object_leaves_message_for_redelivery() {
        let h = harness();
        h.queue.push(confirmation("j1", "uploads/gone.mp4")).await;

        let outcome = h.dispatcher.run_once().await.unwrap();
        assert_eq!(outcome.dispatched, 0);
        assert_eq!(h.queue.len().await, 1);
    }

    #[tokio::test]
    async fn malformed_message_is_discarded() {
        let h = harness();
        h.queue.push("{\"surprise\": true}").await;

        let outcome = h.dispatcher.run_once().await.unwrap();
        assert_eq!(outcome.dispatched, 0);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn processed_tuple_is_not_redispatched() {
        let h = harness();
        let version = h
            .objects
            .put_bytes("uploads/v.mp4", b"video bytes".to_vec(), None)
            .await;
        h.guard
            .mark_processed("uploads/v.mp4", &version, "results/j0/summary.json")
            .await
            .unwrap();
        h.queue.push(confirmation("j1", "uploads/v.mp4")).await;

        let outcome = h.dispatcher.run_once().await.unwrap();
        assert_eq!(outcome.dispatched, 0);
        assert!(h.queue.is_empty().await);
        assert_eq!(h.launcher.count().await, 0);
    }
}
