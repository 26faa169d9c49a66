use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::{progress, Stage, StageTimings};

/// Unique identifier for a processing job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new unique job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Job status lifecycle: `queued → processing → {completed, failed}`.
/// No transition returns to `queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative per-job record, stored in the job state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier, assigned at create time
    pub job_id: JobId,

    /// Current lifecycle status
    pub status: JobStatus,

    /// Most recently completed or entered stage
    pub current_stage: Stage,

    /// Key of the input object in the blob store
    pub object_key: String,

    /// Bucket holding the input object
    pub object_bucket: String,

    /// Opaque content tag of the input object (compared only for equality)
    pub object_version: Option<String>,

    /// Key of the structured summary, set when status is completed
    pub result_key: Option<String>,

    /// Key of the failure report, set when status is failed and the report
    /// upload succeeded
    pub failure_report_key: Option<String>,

    /// Human-readable error, present on failure
    pub error_message: Option<String>,

    /// Opaque identifier of the executor task running this job
    pub task_handle: Option<String>,

    /// Per-stage wall-clock timings in milliseconds
    pub timings: StageTimings,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a freshly queued job record.
    pub fn queued(
        job_id: JobId,
        object_key: impl Into<String>,
        object_bucket: impl Into<String>,
        object_version: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Queued,
            current_stage: Stage::Queued,
            object_key: object_key.into(),
            object_bucket: object_bucket.into(),
            object_version,
            result_key: None,
            failure_report_key: None,
            error_message: None,
            task_handle: None,
            timings: StageTimings::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Derived progress in `[0, 1]`
    pub fn progress(&self) -> f64 {
        progress(self.current_stage, &self.timings)
    }

    /// Apply a partial update, stamping `updated_at`.
    pub fn apply(&mut self, update: JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(stage) = update.current_stage {
            self.current_stage = stage;
        }
        if let Some(msg) = update.error_message {
            self.error_message = Some(msg);
        }
        if let Some(key) = update.result_key {
            self.result_key = Some(key);
        }
        if let Some(key) = update.failure_report_key {
            self.failure_report_key = Some(key);
        }
        if let Some(timings) = update.timings {
            self.timings = timings;
        }
        if let Some(handle) = update.task_handle {
            self.task_handle = Some(handle);
        }
        self.updated_at = Utc::now();
    }

    /// Status API view of this job.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.job_id.clone(),
            status: self.status,
            current_stage: self.current_stage,
            progress: self.progress(),
            error_message: self.error_message.clone(),
            result_key: self.result_key.clone(),
            failure_report_key: self.failure_report_key.clone(),
            timings: self.timings.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Partial job update. Fields are SET-style: a present field replaces the
/// stored value wholesale (`timings` included, the caller merges first).
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub current_stage: Option<Stage>,
    pub error_message: Option<String>,
    pub result_key: Option<String>,
    pub failure_report_key: Option<String>,
    pub timings: Option<StageTimings>,
    pub task_handle: Option<String>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn current_stage(mut self, stage: Stage) -> Self {
        self.current_stage = Some(stage);
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn result_key(mut self, key: impl Into<String>) -> Self {
        self.result_key = Some(key.into());
        self
    }

    pub fn failure_report_key(mut self, key: impl Into<String>) -> Self {
        self.failure_report_key = Some(key.into());
        self
    }

    pub fn timings(mut self, timings: StageTimings) -> Self {
        self.timings = Some(timings);
        self
    }

    pub fn task_handle(mut self, handle: impl Into<String>) -> Self {
        self.task_handle = Some(handle.into());
        self
    }
}

/// Response shape of the status API: a job plus derived progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub current_stage: Stage,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_report_key: Option<String>,
    pub timings: StageTimings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_job_starts_at_zero_progress() {
        let job = Job::queued(JobId::new(), "uploads/v.mp4", "bucket", None);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.current_stage, Stage::Queued);
        assert_eq!(job.progress(), 0.0);
        assert!(job.updated_at >= job.created_at);
    }

    #[test]
    fn apply_update_stamps_updated_at() {
        let mut job = Job::queued(JobId::new(), "k", "b", Some("etag-1".into()));
        let before = job.updated_at;
        job.apply(
            JobUpdate::new()
                .status(JobStatus::Processing)
                .current_stage(Stage::Download),
        );
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.current_stage, Stage::Download);
        assert!(job.updated_at >= before);
        // Untouched fields survive a partial update
        assert_eq!(job.object_version.as_deref(), Some("etag-1"));
    }

    #[test]
    fn status_view_omits_absent_optionals() {
        let job = Job::queued(JobId::from("j1"), "k", "b", None);
        let json = serde_json::to_value(job.status_view()).unwrap();
        assert!(json.get("error_message").is_none());
        assert!(json.get("result_key").is_none());
        assert_eq!(json["status"], "queued");
        assert_eq!(json["progress"], 0.0);
    }

    #[test]
    fn terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
    }
}
