use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use vidiary_core::{Job, JobId, JobStatus, JobUpdate};

use crate::idempotency::{idempotency_key, ClaimStatus, IdempotencyGuard, IdempotencyRecord};
use crate::job_store::{CreateOutcome, JobStore, MAX_LIST_LIMIT};
use crate::StateResult;

/// In-memory job store for tests and local development.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(
        &self,
        job_id: &JobId,
        object_key: &str,
        object_bucket: &str,
        object_version: Option<&str>,
    ) -> StateResult<CreateOutcome> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(job_id.as_str()) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        jobs.insert(
            job_id.to_string(),
            Job::queued(
                job_id.clone(),
                object_key,
                object_bucket,
                object_version.map(String::from),
            ),
        );
        Ok(CreateOutcome::Created)
    }

    async fn get(&self, job_id: &JobId) -> StateResult<Option<Job>> {
        Ok(self.jobs.read().await.get(job_id.as_str()).cloned())
    }

    async fn update(&self, job_id: &JobId, update: JobUpdate) -> StateResult<()> {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id.as_str()) {
            job.apply(update);
        }
        Ok(())
    }

    async fn list(&self, status_filter: Option<JobStatus>, limit: usize) -> StateResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|job| status_filter.map(|s| job.status == s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out.truncate(limit.min(MAX_LIST_LIMIT));
        Ok(out)
    }

    async fn delete(&self, job_id: &JobId) -> StateResult<()> {
        self.jobs.write().await.remove(job_id.as_str());
        Ok(())
    }

    async fn find_queued_by_object_key(&self, object_key: &str) -> StateResult<Option<JobId>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .find(|job| job.status == JobStatus::Queued && job.object_key == object_key)
            .map(|job| job.job_id.clone()))
    }
}

/// In-memory idempotency guard for tests and local development.
#[derive(Clone, Default)]
pub struct MemoryIdempotencyGuard {
    records: Arc<RwLock<HashMap<String, IdempotencyRecord>>>,
}

impl MemoryIdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect a record by tuple, for assertions.
    pub async fn record(
        &self,
        object_key: &str,
        object_version: &str,
    ) -> Option<IdempotencyRecord> {
        let records = self.records.read().await;
        records
            .get(&idempotency_key(object_key, object_version))
            .cloned()
    }

    /// Remove a claim, as an operator replay would.
    pub async fn delete_claim(&self, object_key: &str, object_version: &str) {
        let mut records = self.records.write().await;
        records.remove(&idempotency_key(object_key, object_version));
    }
}

#[async_trait]
impl IdempotencyGuard for MemoryIdempotencyGuard {
    async fn claim(&self, object_key: &str, object_version: &str) -> StateResult<bool> {
        let key = idempotency_key(object_key, object_version);
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(
            key,
            IdempotencyRecord {
                object_key: object_key.to_string(),
                object_version: object_version.trim().trim_matches('"').to_string(),
                status: ClaimStatus::Dispatched,
                result_key: None,
                processed_at: None,
            },
        );
        Ok(true)
    }

    async fn mark_processed(
        &self,
        object_key: &str,
        object_version: &str,
        result_key: &str,
    ) -> StateResult<()> {
        let key = idempotency_key(object_key, object_version);
        let mut records = self.records.write().await;
        records.insert(
            key,
            IdempotencyRecord {
                object_key: object_key.to_string(),
                object_version: object_version.trim().trim_matches('"').to_string(),
                status: ClaimStatus::Processed,
                result_key: Some(result_key.to_string()),
                processed_at: Some(Utc::now()),
            },
        );
        Ok(())
    }

    async fn is_processed(&self, object_key: &str, object_version: &str) -> StateResult<bool> {
        let records = self.records.read().await;
        Ok(records
            .get(&idempotency_key(object_key, object_version))
            .map(|r| r.status == ClaimStatus::Processed)
            .unwrap_or(false))
    }
}
