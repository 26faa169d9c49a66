//! Memory-backed end-to-end flow: a confirmation message is dispatched,
//! the launched job is executed, and duplicate deliveries stay harmless.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use vidiary_blob::MemoryObjectStore;
use vidiary_core::{DailySummary, JobStatus, Settings, Stage, VideoMetadata};
use vidiary_dispatch::{DispatchResult, Dispatcher, LaunchSpec, MemoryQueue, TaskLauncher};
use vidiary_index::{EmbeddingModel, IndexResult, MemoryVectorStore};
use vidiary_pipeline::{
    DiarizerOutput, Executor, JobSpec, LanguageModel, MediaProcessor, PipelineResult,
    SceneDetector, SpeakerDiarizer, SpeakerSpan, SpeechRecognizer, Summarizer, TranscribedSpan,
};
use vidiary_state::{IdempotencyGuard, JobStore, MemoryIdempotencyGuard, MemoryJobStore};

const OBJECT_KEY: &str = "uploads/20260120_120000_abc_video.mp4";

/// Records launch specs instead of spawning processes.
#[derive(Default)]
struct RecordingLauncher {
    launches: Mutex<Vec<LaunchSpec>>,
}

#[async_trait]
impl TaskLauncher for RecordingLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> DispatchResult<String> {
        let mut launches = self.launches.lock().await;
        launches.push(spec.clone());
        Ok(format!("task-{}", launches.len()))
    }
}

struct StubMedia;

#[async_trait]
impl MediaProcessor for StubMedia {
    async fn probe(&self, _source: &str) -> PipelineResult<VideoMetadata> {
        Ok(VideoMetadata {
            duration: 600.0,
            width: Some(1280),
            height: Some(720),
            fps: Some(30.0),
            codec: Some("h264".to_string()),
        })
    }

    async fn extract_audio(&self, _source: &str, output: &Path) -> PipelineResult<PathBuf> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"RIFF").await?;
        Ok(output.to_path_buf())
    }

    async fn extract_keyframe(
        &self,
        _video_path: &Path,
        _timestamp: f64,
        output: &Path,
    ) -> PipelineResult<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"JPEG").await?;
        Ok(())
    }
}

struct StubDiarizer;

#[async_trait]
impl SpeakerDiarizer for StubDiarizer {
    async fn diarize(&self, _audio_path: &Path) -> PipelineResult<DiarizerOutput> {
        Ok(DiarizerOutput::Annotated(vec![SpeakerSpan {
            start: 0.0,
            end: 600.0,
            speaker_id: "SPEAKER_00".to_string(),
        }]))
    }
}

struct StubRecognizer;

#[async_trait]
impl SpeechRecognizer for StubRecognizer {
    async fn transcribe(
        &self,
        _audio_path: &Path,
        _language: Option<&str>,
    ) -> PipelineResult<Vec<TranscribedSpan>> {
        Ok(vec![
            TranscribedSpan {
                start: 10.0,
                end: 90.0,
                text: "Morning review of yesterday's notes.".to_string(),
            },
            TranscribedSpan {
                start: 330.0,
                end: 420.0,
                text: "Writing up the plan for tomorrow.".to_string(),
            },
        ])
    }
}

struct StubScenes;

#[async_trait]
impl SceneDetector for StubScenes {
    async fn detect(&self, _video_path: &Path, _threshold: f64) -> PipelineResult<Vec<f64>> {
        Ok(vec![305.0])
    }

    async fn extract_keyframes(
        &self,
        _video_path: &Path,
        boundaries: &[f64],
        output_dir: &Path,
    ) -> PipelineResult<Vec<vidiary_core::VideoFrame>> {
        Ok(boundaries
            .iter()
            .enumerate()
            .map(|(i, t)| vidiary_core::VideoFrame {
                timestamp: *t,
                frame_path: output_dir
                    .join(format!("keyframe_{i:04}.jpg"))
                    .display()
                    .to_string(),
                scene_change_detected: true,
            })
            .collect())
    }
}

struct StubLlm;

#[async_trait]
impl LanguageModel for StubLlm {
    async fn summarize(&self, _system: &str, _user: &str) -> PipelineResult<String> {
        Ok("## 00:00 - 00:05: Journal review\n\
            * **Location:** Study\n\
            * **Source Reliability:** Medium\n\
            * **Transcript Summary:** Reviewed notes and planned ahead.\n"
            .to_string())
    }
}

struct StubEmbedder;

#[async_trait]
impl EmbeddingModel for StubEmbedder {
    async fn embed(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

fn confirmation(job_id: &str) -> String {
    format!(r#"{{"job_id":"{job_id}","object_key":"{OBJECT_KEY}","object_bucket":"bucket"}}"#)
}

fn upload_event() -> String {
    format!(
        r#"{{"Records":[{{"s3":{{"bucket":{{"name":"bucket"}},"object":{{"key":"{OBJECT_KEY}"}}}}}}]}}"#
    )
}

#[tokio::test]
async fn dispatched_job_executes_to_completion_and_duplicates_are_discarded() {
    let queue = Arc::new(MemoryQueue::new());
    let objects = Arc::new(MemoryObjectStore::new("bucket"));
    let jobs = Arc::new(MemoryJobStore::new());
    let guard = Arc::new(MemoryIdempotencyGuard::new());
    let launcher = Arc::new(RecordingLauncher::default());
    let vectors = Arc::new(MemoryVectorStore::new());

    let version = objects
        .put_bytes(OBJECT_KEY, vec![9u8; 2048], Some("video/mp4"))
        .await;

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

    // Confirmation arrives and dispatches exactly one task
    queue.push(confirmation("j-e2e")).await;
    let outcome = dispatcher.run_once().await.unwrap();
    assert_eq!(outcome.dispatched, 1);
    assert!(queue.is_empty().await);

    let launched = launcher.launches.lock().await.first().cloned().unwrap();
    assert_eq!(launched.job_id.as_str(), "j-e2e");
    assert_eq!(launched.object_key, OBJECT_KEY);

    // Run the executor the launcher would have spawned
    let mut settings = Settings::default();
    settings.work_dir = tempfile::tempdir()
        .unwrap()
        .into_path()
        .display()
        .to_string();

    let executor = Executor::new(
        objects.clone(),
        jobs.clone(),
        guard.clone(),
        Arc::new(StubMedia),
        Arc::new(StubDiarizer),
        Arc::new(StubRecognizer),
        Arc::new(StubScenes),
        Summarizer::new(Arc::new(StubLlm), 3),
        settings,
    )
    .with_indexing(vectors.clone(), Arc::new(StubEmbedder));

    let spec = JobSpec {
        job_id: launched.job_id.clone(),
        object_key: launched.object_key.clone(),
        object_bucket: launched.object_bucket.clone(),
    };
    let code = executor.execute(&spec).await;
    assert_eq!(code, 0);

    let job = jobs.get(&launched.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.current_stage, Stage::Completed);
    assert_eq!(job.progress(), 1.0);

    let raw = objects
        .get_bytes("results/j-e2e/summary.json")
        .await
        .unwrap();
    let summary: DailySummary = serde_json::from_slice(&raw).unwrap();
    assert_eq!(summary.time_blocks.len(), 2);
    assert!(objects.exists("results/j-e2e/summary.md").await);
    assert!(guard.is_processed(OBJECT_KEY, &version).await.unwrap());
    assert!(vectors.len().await > 0);

    // The storage upload event for the same object arrives late: it adopts
    // nothing (the job is no longer queued) and is discarded
    queue.push(upload_event()).await;
    let outcome = dispatcher.run_once().await.unwrap();
    assert_eq!(outcome.dispatched, 0);
    assert!(queue.is_empty().await);

    // A duplicate confirmation finds the processed tuple and is discarded
    queue.push(confirmation("j-e2e")).await;
    let outcome = dispatcher.run_once().await.unwrap();
    assert_eq!(outcome.dispatched, 0);
    assert!(queue.is_empty().await);

    // Exactly one job, still completed
    assert_eq!(jobs.len().await, 1);
    let job = jobs.get(&launched.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}
