use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use vidiary_core::JobId;

use crate::{DispatchError, DispatchResult};

/// Everything an executor task needs to run one job, passed via its
/// environment.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub job_id: JobId,
    pub object_key: String,
    pub object_bucket: String,
    pub jobs_table: String,
    pub idempotency_table: String,
}

/// Starts one isolated executor task per job and returns an opaque task
/// handle recorded on the job.
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> DispatchResult<String>;
}

/// Launches the worker binary as a child process.
///
/// The child gets the job identity through its environment, numerical-library
/// thread counts pinned to 1 to prevent oversubscription, and a detached
/// watchdog that kills it at the wall-clock deadline. No graceful shutdown is
/// attempted on timeout; the job record is left for the operational sweeper.
pub struct ProcessLauncher {
    command: Vec<String>,
    deadline: Duration,
}

impl ProcessLauncher {
    /// `command` is the worker invocation, whitespace-separated
    /// (e.g. `"vidiary-worker"` or `"cargo run --bin vidiary-worker"`).
    pub fn new(command: &str, deadline: Duration) -> Self {
        Self {
            command: command.split_whitespace().map(String::from).collect(),
            deadline,
        }
    }
}

#[async_trait]
impl TaskLauncher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> DispatchResult<String> {
        let program = self
            .command
            .first()
            .ok_or_else(|| DispatchError::launch_failed("empty worker command"))?;

        let mut command = Command::new(program);
        command
            .args(&self.command[1..])
            .env("JOB_ID", spec.job_id.as_str())
            .env("OBJECT_KEY", &spec.object_key)
            .env("OBJECT_BUCKET", &spec.object_bucket)
            .env("S3_BUCKET", &spec.object_bucket)
            .env("JOBS_TABLE_NAME", &spec.jobs_table)
            .env("IDEMPOTENCY_TABLE_NAME", &spec.idempotency_table)
            // Branch threads own their parallelism; numerical libraries
            // must not multiply it.
            .env("OMP_NUM_THREADS", "1")
            .env("OPENBLAS_NUM_THREADS", "1")
            .env("MKL_NUM_THREADS", "1")
            .kill_on_drop(false);

        let mut child = command
            .spawn()
            .map_err(|e| DispatchError::launch_failed(e.to_string()))?;

        let pid = child
            .id()
            .ok_or_else(|| DispatchError::launch_failed("worker exited before launch returned"))?;
        let handle = format!("pid:{pid}");
        info!(job_id = %spec.job_id, handle, "launched executor task");

        // Watchdog: the task runtime owns the deadline, not the worker.
        let deadline = self.deadline;
        let job_id = spec.job_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => {
                        info!(job_id = %job_id, "executor task exited cleanly");
                    }
                    Ok(status) => {
                        warn!(job_id = %job_id, ?status, "executor task exited non-zero");
                    }
                    Err(err) => {
                        error!(job_id = %job_id, %err, "failed waiting on executor task");
                    }
                },
                _ = tokio::time::sleep(deadline) => {
                    error!(job_id = %job_id, ?deadline, "executor task hit wall-clock deadline, killing");
                    child.kill().await.ok();
                }
            }
        });

        Ok(handle)
    }
}
