//! Worker entrypoint: run one job from the environment to completion and
//! exit with the pipeline's status code.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vidiary_blob::S3ObjectStore;
use vidiary_core::Settings;
use vidiary_index::QdrantVectorStore;
use vidiary_pipeline::{
    Executor, FfmpegMedia, FfmpegSceneDetector, HttpDiarizer, JobSpec, OpenAiClient, Summarizer,
};
use vidiary_state::{DynamoIdempotencyGuard, DynamoJobStore};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::from_env();
    let spec = match JobSpec::from_env() {
        Ok(spec) => spec,
        Err(err) => {
            error!(%err, "missing job identity");
            return ExitCode::FAILURE;
        }
    };
    info!(job_id = %spec.job_id, object_key = %spec.object_key, "executor starting");

    let objects = Arc::new(
        S3ObjectStore::from_env(&settings.aws_region, spec.object_bucket.clone()).await,
    );
    let jobs = Arc::new(
        DynamoJobStore::from_env(&settings.aws_region, settings.jobs_table.clone()).await,
    );
    let guard = Arc::new(
        DynamoIdempotencyGuard::from_env(&settings.aws_region, settings.idempotency_table.clone())
            .await,
    );

    let openai = match OpenAiClient::from_settings(&settings) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!(%err, "language model client unavailable");
            return ExitCode::FAILURE;
        }
    };
    let diarizer = match &settings.diarizer_url {
        Some(url) => Arc::new(HttpDiarizer::new(url.clone())),
        None => {
            error!("DIARIZER_URL is required");
            return ExitCode::FAILURE;
        }
    };

    let media = Arc::new(FfmpegMedia::new());
    let scenes = Arc::new(FfmpegSceneDetector::new(media.clone()));
    let summarizer = Summarizer::new(openai.clone(), settings.llm_max_retries);

    let mut executor = Executor::new(
        objects,
        jobs,
        guard,
        media,
        diarizer,
        openai.clone(),
        scenes,
        summarizer,
        settings.clone(),
    );

    match &settings.qdrant_url {
        Some(url) => match QdrantVectorStore::connect(
            url,
            settings.qdrant_api_key.clone(),
            settings.qdrant_collection.clone(),
        ) {
            Ok(store) => {
                executor = executor.with_indexing(Arc::new(store), openai);
            }
            Err(err) => warn!(%err, "vector store unavailable, indexing disabled"),
        },
        None => info!("vector store not configured, indexing disabled"),
    }

    let code = executor.execute(&spec).await;
    if code == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
