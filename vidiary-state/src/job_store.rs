use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use vidiary_core::{Job, JobId, JobStatus, JobUpdate, Stage, StageTimings};

use crate::{StateError, StateResult};

/// Scan responses are capped regardless of the caller's limit.
pub const MAX_LIST_LIMIT: usize = 500;

/// Outcome of a conditional create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// The record existed already; treated as success by callers.
    AlreadyExists,
}

/// Authoritative job metadata store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Conditionally insert a fresh `queued` record. Returns
    /// [`CreateOutcome::AlreadyExists`] instead of failing when the job id
    /// is already present.
    async fn create(
        &self,
        job_id: &JobId,
        object_key: &str,
        object_bucket: &str,
        object_version: Option<&str>,
    ) -> StateResult<CreateOutcome>;

    async fn get(&self, job_id: &JobId) -> StateResult<Option<Job>>;

    /// Partial update. Present fields replace stored values; `updated_at` is
    /// always stamped.
    async fn update(&self, job_id: &JobId, update: JobUpdate) -> StateResult<()>;

    /// Operational scan, optionally filtered by status. `limit` is capped at
    /// [`MAX_LIST_LIMIT`].
    async fn list(&self, status_filter: Option<JobStatus>, limit: usize) -> StateResult<Vec<Job>>;

    async fn delete(&self, job_id: &JobId) -> StateResult<()>;

    /// Find a `queued` job for an object key. Used by the dispatcher to adopt
    /// the job a confirmation message created first.
    async fn find_queued_by_object_key(&self, object_key: &str) -> StateResult<Option<JobId>>;
}

/// DynamoDB-backed job store.
#[derive(Clone)]
pub struct DynamoJobStore {
    client: Client,
    table: String,
}

impl DynamoJobStore {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// Construct a client from the ambient AWS environment.
    pub async fn from_env(region: &str, table: impl Into<String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config), table)
    }

    fn job_from_item(item: &HashMap<String, AttributeValue>) -> StateResult<Job> {
        let job_id = attr_s(item, "job_id")
            .ok_or_else(|| StateError::malformed("<unknown>", "missing job_id"))?;

        let status = attr_s(item, "status")
            .and_then(|s| JobStatus::parse(&s))
            .ok_or_else(|| StateError::malformed(&job_id, "missing or invalid status"))?;
        let current_stage = attr_s(item, "current_stage")
            .and_then(|s| Stage::parse(&s))
            .unwrap_or(Stage::Queued);

        let timings = attr_s(item, "timings")
            .and_then(|raw| serde_json::from_str::<StageTimings>(&raw).ok())
            .unwrap_or_default();

        Ok(Job {
            job_id: JobId::from(job_id.clone()),
            status,
            current_stage,
            object_key: attr_s(item, "object_key").unwrap_or_default(),
            object_bucket: attr_s(item, "object_bucket").unwrap_or_default(),
            object_version: attr_s(item, "object_version"),
            result_key: attr_s(item, "result_key"),
            failure_report_key: attr_s(item, "failure_report_key"),
            error_message: attr_s(item, "error_message"),
            task_handle: attr_s(item, "task_handle"),
            timings,
            created_at: attr_time(item, "created_at")
                .ok_or_else(|| StateError::malformed(&job_id, "missing created_at"))?,
            updated_at: attr_time(item, "updated_at")
                .ok_or_else(|| StateError::malformed(&job_id, "missing updated_at"))?,
        })
    }
}

#[async_trait]
impl JobStore for DynamoJobStore {
    async fn create(
        &self,
        job_id: &JobId,
        object_key: &str,
        object_bucket: &str,
        object_version: Option<&str>,
    ) -> StateResult<CreateOutcome> {
        let now = Utc::now().to_rfc3339();
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table)
            .item("job_id", AttributeValue::S(job_id.to_string()))
            .item("status", AttributeValue::S("queued".to_string()))
            .item("current_stage", AttributeValue::S("queued".to_string()))
            .item("object_key", AttributeValue::S(object_key.to_string()))
            .item(
                "object_bucket",
                AttributeValue::S(object_bucket.to_string()),
            )
            .item("created_at", AttributeValue::S(now.clone()))
            .item("updated_at", AttributeValue::S(now))
            .condition_expression("attribute_not_exists(job_id)");
        if let Some(version) = object_version {
            request = request.item("object_version", AttributeValue::S(version.to_string()));
        }

        match request.send().await {
            Ok(_) => {
                info!(job_id = %job_id, "created job record");
                Ok(CreateOutcome::Created)
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_conditional_check_failed_exception())
                    .unwrap_or(false)
                {
                    debug!(job_id = %job_id, "job already exists, skipping create");
                    return Ok(CreateOutcome::AlreadyExists);
                }
                Err(StateError::backend(err))
            }
        }
    }

    async fn get(&self, job_id: &JobId) -> StateResult<Option<Job>> {
        let out = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("job_id", AttributeValue::S(job_id.to_string()))
            .send()
            .await
            .map_err(StateError::backend)?;

        match out.item() {
            Some(item) => Ok(Some(Self::job_from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, job_id: &JobId, update: JobUpdate) -> StateResult<()> {
        let mut sets = vec!["updated_at = :ua".to_string()];
        let mut names: HashMap<String, String> = HashMap::new();
        let mut values: HashMap<String, AttributeValue> = HashMap::new();
        values.insert(
            ":ua".to_string(),
            AttributeValue::S(Utc::now().to_rfc3339()),
        );

        if let Some(status) = update.status {
            // `status` is a reserved word in update expressions
            sets.push("#st = :st".to_string());
            names.insert("#st".to_string(), "status".to_string());
            values.insert(":st".to_string(), AttributeValue::S(status.to_string()));
        }
        if let Some(stage) = update.current_stage {
            sets.push("current_stage = :cs".to_string());
            values.insert(":cs".to_string(), AttributeValue::S(stage.to_string()));
        }
        if let Some(message) = update.error_message {
            sets.push("error_message = :em".to_string());
            values.insert(":em".to_string(), AttributeValue::S(message));
        }
        if let Some(key) = update.result_key {
            sets.push("result_key = :rk".to_string());
            values.insert(":rk".to_string(), AttributeValue::S(key));
        }
        if let Some(key) = update.failure_report_key {
            sets.push("failure_report_key = :fk".to_string());
            values.insert(":fk".to_string(), AttributeValue::S(key));
        }
        if let Some(timings) = update.timings {
            let raw = serde_json::to_string(&timings)
                .map_err(|e| StateError::malformed(job_id.as_str(), e.to_string()))?;
            sets.push("timings = :ti".to_string());
            values.insert(":ti".to_string(), AttributeValue::S(raw));
        }
        if let Some(handle) = update.task_handle {
            sets.push("task_handle = :th".to_string());
            values.insert(":th".to_string(), AttributeValue::S(handle));
        }

        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("job_id", AttributeValue::S(job_id.to_string()))
            .update_expression(format!("SET {}", sets.join(", ")))
            .set_expression_attribute_values(Some(values));
        if !names.is_empty() {
            request = request.set_expression_attribute_names(Some(names));
        }

        request.send().await.map_err(StateError::backend)?;
        debug!(job_id = %job_id, "updated job record");
        Ok(())
    }

    async fn list(&self, status_filter: Option<JobStatus>, limit: usize) -> StateResult<Vec<Job>> {
        let limit = limit.min(MAX_LIST_LIMIT);
        let mut request = self
            .client
            .scan()
            .table_name(&self.table)
            .limit(limit as i32);
        if let Some(status) = status_filter {
            request = request
                .filter_expression("#st = :st")
                .expression_attribute_names("#st", "status")
                .expression_attribute_values(":st", AttributeValue::S(status.to_string()));
        }

        let out = request.send().await.map_err(StateError::backend)?;
        let mut jobs = Vec::new();
        for item in out.items() {
            match Self::job_from_item(item) {
                Ok(job) => jobs.push(job),
                Err(err) => debug!("skipping malformed job record: {err}"),
            }
        }
        Ok(jobs)
    }

    async fn delete(&self, job_id: &JobId) -> StateResult<()> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("job_id", AttributeValue::S(job_id.to_string()))
            .send()
            .await
            .map_err(StateError::backend)?;
        info!(job_id = %job_id, "deleted job record");
        Ok(())
    }

    async fn find_queued_by_object_key(&self, object_key: &str) -> StateResult<Option<JobId>> {
        let out = self
            .client
            .scan()
            .table_name(&self.table)
            .filter_expression("object_key = :k AND #st = :q")
            .expression_attribute_names("#st", "status")
            .expression_attribute_values(":k", AttributeValue::S(object_key.to_string()))
            .expression_attribute_values(":q", AttributeValue::S("queued".to_string()))
            .projection_expression("job_id")
            .send()
            .await
            .map_err(StateError::backend)?;

        Ok(out
            .items()
            .first()
            .and_then(|item| attr_s(item, "job_id"))
            .map(JobId::from))
    }
}

fn attr_s(item: &HashMap<String, AttributeValue>, key: &str) -> Option<String> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .filter(|s| !s.is_empty())
        .cloned()
}

fn attr_time(item: &HashMap<String, AttributeValue>, key: &str) -> Option<DateTime<Utc>> {
    attr_s(item, key)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
