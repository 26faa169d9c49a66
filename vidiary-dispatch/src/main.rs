//! Dispatcher entrypoint: consume the upload/confirmation queue and launch
//! one executor task per claimed job.

use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vidiary_blob::S3ObjectStore;
use vidiary_core::Settings;
use vidiary_dispatch::{Dispatcher, ProcessLauncher, SqsQueue};
use vidiary_state::{DynamoIdempotencyGuard, DynamoJobStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();
    if settings.queue_url.is_empty() {
        return Err("SQS_QUEUE_URL is required".into());
    }
    if settings.s3_bucket.is_empty() {
        return Err("S3_BUCKET is required".into());
    }

    let aws = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(settings.aws_region.clone()))
        .load()
        .await;

    let queue = Arc::new(SqsQueue::new(
        aws_sdk_sqs::Client::new(&aws),
        settings.queue_url.clone(),
    ));
    let objects = Arc::new(
        S3ObjectStore::from_env(&settings.aws_region, settings.s3_bucket.clone()).await,
    );
    let jobs = Arc::new(
        DynamoJobStore::from_env(&settings.aws_region, settings.jobs_table.clone()).await,
    );
    let guard = Arc::new(
        DynamoIdempotencyGuard::from_env(&settings.aws_region, settings.idempotency_table.clone())
            .await,
    );
    let launcher = Arc::new(ProcessLauncher::new(
        &settings.worker_command,
        Duration::from_secs(settings.executor_timeout_seconds),
    ));

    let dispatcher = Dispatcher::new(
        queue,
        objects,
        jobs,
        guard,
        launcher,
        settings.s3_bucket.clone(),
        settings.jobs_table.clone(),
        settings.idempotency_table.clone(),
    );

    info!(queue_url = %settings.queue_url, "dispatcher starting");
    dispatcher.run().await?;
    Ok(())
}
