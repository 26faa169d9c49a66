use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use vidiary_blob::{ObjectStore, PresignMethod};
use vidiary_core::{
    AudioSegment, JobId, JobStatus, JobUpdate, Settings, Stage, StageTimings, VideoFrame,
    VideoMetadata,
};
use vidiary_index::{index_summary, EmbeddingModel, VectorStore};
use vidiary_state::{IdempotencyGuard, JobStore};

use crate::collab::{
    merge_transcript_with_speakers, SpeakerDiarizer, SpeechRecognizer,
};
use crate::media::MediaProcessor;
use crate::scene::SceneDetector;
use crate::summarize::Summarizer;
use crate::sync::synchronize;
use crate::timing::StageClock;
use crate::{PipelineError, PipelineResult};

/// Presigned GET lifetime for the streaming intake.
const STREAM_URL_TTL_SECONDS: u64 = 3600;

/// One job's identity, as handed to the executor task via its environment.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: JobId,
    pub object_key: String,
    pub object_bucket: String,
}

impl JobSpec {
    /// Read the identity the dispatcher placed in this task's environment.
    pub fn from_env() -> PipelineResult<Self> {
        let job_id = std::env::var("JOB_ID").unwrap_or_default();
        let object_key = std::env::var("OBJECT_KEY").unwrap_or_default();
        let object_bucket = std::env::var("OBJECT_BUCKET")
            .or_else(|_| std::env::var("S3_BUCKET"))
            .unwrap_or_default();
        if job_id.is_empty() || object_key.is_empty() || object_bucket.is_empty() {
            return Err(PipelineError::bad_input(
                "JOB_ID, OBJECT_KEY, and OBJECT_BUCKET are required",
            ));
        }
        Ok(Self {
            job_id: JobId::from(job_id),
            object_key,
            object_bucket,
        })
    }
}

/// The per-job pipeline runtime.
///
/// Downloads the input (streaming the audio decode against a presigned URL
/// while the full object lands on disk), runs the audio and scene branches in
/// parallel, joins them for synchronization and summarization, uploads the
/// artifacts, indexes chunks best-effort, and finalizes job state. All
/// failure-path cleanup lives in one outer handler.
pub struct Executor {
    objects: Arc<dyn ObjectStore>,
    jobs: Arc<dyn JobStore>,
    guard: Arc<dyn IdempotencyGuard>,
    media: Arc<dyn MediaProcessor>,
    diarizer: Arc<dyn SpeakerDiarizer>,
    recognizer: Arc<dyn SpeechRecognizer>,
    scenes: Arc<dyn SceneDetector>,
    summarizer: Summarizer,
    vectors: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    settings: Settings,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        jobs: Arc<dyn JobStore>,
        guard: Arc<dyn IdempotencyGuard>,
        media: Arc<dyn MediaProcessor>,
        diarizer: Arc<dyn SpeakerDiarizer>,
        recognizer: Arc<dyn SpeechRecognizer>,
        scenes: Arc<dyn SceneDetector>,
        summarizer: Summarizer,
        settings: Settings,
    ) -> Self {
        Self {
            objects,
            jobs,
            guard,
            media,
            diarizer,
            recognizer,
            scenes,
            summarizer,
            vectors: None,
            embedder: None,
            settings,
        }
    }

    /// Enable the indexing stage.
    pub fn with_indexing(
        mut self,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingModel>,
    ) -> Self {
        self.vectors = Some(vectors);
        self.embedder = Some(embedder);
        self
    }

    /// Run one job to completion and return the process exit code.
    #[instrument(skip(self), fields(job_id = %spec.job_id))]
    pub async fn execute(&self, spec: &JobSpec) -> i32 {
        let mut timings = StageTimings::new();
        let temp_dir =
            PathBuf::from(&self.settings.work_dir).join(format!("vidiary_{}", spec.job_id));

        let result = self.run_job(spec, &temp_dir, &mut timings).await;
        let code = match result {
            Ok(result_key) => {
                info!(job_id = %spec.job_id, result_key, "job completed");
                0
            }
            Err(err) => {
                self.handle_failure(spec, &err, &timings, &temp_dir).await;
                1
            }
        };

        if self.settings.cleanup_temp_files {
            tokio::fs::remove_dir_all(&temp_dir).await.ok();
        }
        code
    }

    async fn run_job(
        &self,
        spec: &JobSpec,
        temp_dir: &Path,
        timings: &mut StageTimings,
    ) -> PipelineResult<String> {
        tokio::fs::create_dir_all(temp_dir).await?;

        let clock = StageClock::start(Stage::Started);
        self.push_update(
            &spec.job_id,
            JobUpdate::new()
                .status(JobStatus::Processing)
                .current_stage(Stage::Started),
        )
        .await;
        let head = self
            .objects
            .head(&spec.object_key, Some(&spec.object_bucket))
            .await?
            .ok_or_else(|| {
                PipelineError::bad_input(format!("input object missing: {}", spec.object_key))
            })?;
        let object_version = head.version.unwrap_or_default();
        clock.finish(timings);

        let file_name = Path::new(&spec.object_key)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "input.mp4".into());
        let local_video = temp_dir.join(file_name);

        let (metadata, audio_path) = if self.settings.use_streaming_intake {
            self.streaming_intake(spec, temp_dir, &local_video, timings)
                .await?
        } else {
            self.sequential_intake(spec, temp_dir, &local_video, timings)
                .await?
        };

        // Audio branch (diarization + asr) and scene branch (detection +
        // keyframes) run concurrently and join before sync. Branch tasks
        // record into their own timing maps, merged here.
        let audio_branch = {
            let diarizer = self.diarizer.clone();
            let recognizer = self.recognizer.clone();
            let jobs = self.jobs.clone();
            let job_id = spec.job_id.clone();
            let audio_path = audio_path.clone();
            tokio::spawn(async move {
                let mut branch_timings = StageTimings::new();
                let result = run_audio_branch(
                    diarizer,
                    recognizer,
                    jobs,
                    job_id,
                    &audio_path,
                    &mut branch_timings,
                )
                .await;
                (result, branch_timings)
            })
        };
        let scene_branch = {
            let scenes = self.scenes.clone();
            let jobs = self.jobs.clone();
            let job_id = spec.job_id.clone();
            let video_path = local_video.clone();
            let keyframes_dir = temp_dir.join("keyframes");
            let threshold = self.settings.scene_detection_threshold;
            let duration = metadata.duration;
            tokio::spawn(async move {
                let mut branch_timings = StageTimings::new();
                let result = run_scene_branch(
                    scenes,
                    jobs,
                    job_id,
                    &video_path,
                    &keyframes_dir,
                    threshold,
                    duration,
                    &mut branch_timings,
                )
                .await;
                (result, branch_timings)
            })
        };

        let (audio_joined, scene_joined) = tokio::join!(audio_branch, scene_branch);
        let (audio_result, audio_timings) = audio_joined.map_err(|e| PipelineError::BranchPanic {
            reason: e.to_string(),
        })?;
        let (scene_result, scene_timings) = scene_joined.map_err(|e| PipelineError::BranchPanic {
            reason: e.to_string(),
        })?;
        timings.merge(&audio_timings);
        timings.merge(&scene_timings);
        let audio_segments = audio_result?;
        let (scene_boundaries, keyframes) = scene_result?;

        // Sync: align both branches into fixed windows
        let clock = StageClock::start(Stage::Sync);
        let windows = synchronize(
            &audio_segments,
            &keyframes,
            &scene_boundaries,
            metadata.duration,
            self.settings.chunk_window_seconds,
        );
        clock.finish(timings);
        if windows.is_empty() {
            return Err(PipelineError::stage_failed(Stage::Sync, "no windows produced"));
        }
        self.update_stage(spec, Stage::Sync, timings.clone()).await;

        // Summarization: one model call per non-empty window
        let date = date_from_object_key(&spec.object_key)
            .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
        let video_source = format!("s3://{}/{}", spec.object_bucket, spec.object_key);
        let clock = StageClock::start(Stage::Summarization);
        let summary = self
            .summarizer
            .create_daily_summary(&windows, &date, Some(video_source), Some(metadata.clone()))
            .await;
        clock.finish(timings);
        let summary = summary?;
        if summary.time_blocks.is_empty() {
            return Err(PipelineError::stage_failed(
                Stage::Summarization,
                "no time blocks created",
            ));
        }
        self.update_stage(spec, Stage::Summarization, timings.clone())
            .await;

        // Upload both artifacts; either failing fails the stage
        let result_key = format!("results/{}/summary.json", spec.job_id);
        let markdown_key = format!("results/{}/summary.md", spec.job_id);
        let clock = StageClock::start(Stage::Upload);
        let upload = async {
            let json_path = temp_dir.join("summary.json");
            tokio::fs::write(&json_path, serde_json::to_string_pretty(&summary)?).await?;
            let mut metadata = BTreeMap::new();
            metadata.insert("job_id".to_string(), spec.job_id.to_string());
            metadata.insert("video_key".to_string(), spec.object_key.clone());
            self.objects
                .upload(&json_path, &result_key, Some("application/json"), Some(&metadata))
                .await?;

            let markdown_path = temp_dir.join("summary.md");
            tokio::fs::write(&markdown_path, summary.to_markdown()).await?;
            self.objects
                .upload(&markdown_path, &markdown_key, Some("text/markdown"), None)
                .await?;
            Ok::<_, PipelineError>(())
        }
        .await;
        clock.finish(timings);
        upload?;
        self.update_stage(spec, Stage::Upload, timings.clone()).await;

        // Indexing is best-effort; success also finalizes the idempotency
        // record so replays of this tuple stop here.
        let clock = StageClock::start(Stage::Indexing);
        let video_id = format!("{}/{}", spec.object_bucket, spec.object_key);
        let indexed = match (&self.vectors, &self.embedder) {
            (Some(store), Some(embedder)) => index_summary(
                &summary,
                &video_id,
                store.as_ref(),
                embedder.as_ref(),
                self.settings.embedding_batch_size,
            )
            .await
            .map(|count| debug!(count, "indexed summary")),
            _ => {
                debug!("vector store not configured, skipping indexing");
                Ok(())
            }
        };
        clock.finish(timings);
        match indexed {
            Ok(()) => {
                if let Err(err) = self
                    .guard
                    .mark_processed(&spec.object_key, &object_version, &result_key)
                    .await
                {
                    warn!(%err, "marking idempotency record processed failed");
                }
            }
            Err(err) => warn!(%err, "indexing failed, continuing without it"),
        }
        self.update_stage(spec, Stage::Indexing, timings.clone()).await;

        // Terminal update is the last write for this job
        self.push_update(
            &spec.job_id,
            JobUpdate::new()
                .status(JobStatus::Completed)
                .current_stage(Stage::Completed)
                .result_key(result_key.clone())
                .timings(timings.clone()),
        )
        .await;

        Ok(result_key)
    }

    /// Overlap the full download with audio extraction: the decoder streams
    /// from a presigned URL while the object lands on disk for the scene
    /// branch, which needs random-access frames.
    async fn streaming_intake(
        &self,
        spec: &JobSpec,
        temp_dir: &Path,
        local_video: &Path,
        timings: &mut StageTimings,
    ) -> PipelineResult<(VideoMetadata, PathBuf)> {
        let url = self
            .objects
            .presign(&spec.object_key, PresignMethod::Get, STREAM_URL_TTL_SECONDS, None)
            .await?;

        let download = {
            let objects = self.objects.clone();
            let key = spec.object_key.clone();
            let bucket = spec.object_bucket.clone();
            let target = local_video.to_path_buf();
            tokio::spawn(async move {
                let mut download_timings = StageTimings::new();
                let clock = StageClock::start(Stage::Download);
                let result = objects.download(&key, &target, Some(&bucket)).await;
                clock.finish(&mut download_timings);
                (result, download_timings)
            })
        };
        self.update_stage(spec, Stage::Download, timings.clone()).await;

        let clock = StageClock::start(Stage::AudioExtraction);
        let extraction = async {
            let metadata = self.media.probe(&url).await?;
            let audio = self
                .media
                .extract_audio(&url, &temp_dir.join("audio.wav"))
                .await?;
            Ok::<_, PipelineError>((metadata, audio))
        }
        .await;
        clock.finish(timings);
        let (metadata, audio_path) = match extraction {
            Ok(value) => value,
            Err(err) => {
                download.abort();
                return Err(err);
            }
        };
        self.update_stage(spec, Stage::AudioExtraction, timings.clone())
            .await;

        // The scene branch needs the whole file; block here
        let (download_result, download_timings) =
            download.await.map_err(|e| PipelineError::BranchPanic {
                reason: e.to_string(),
            })?;
        timings.merge(&download_timings);
        download_result?;
        if !local_video.exists() {
            return Err(PipelineError::stage_failed(
                Stage::Download,
                format!("local file missing after download: {}", local_video.display()),
            ));
        }

        Ok((metadata, audio_path))
    }

    async fn sequential_intake(
        &self,
        spec: &JobSpec,
        temp_dir: &Path,
        local_video: &Path,
        timings: &mut StageTimings,
    ) -> PipelineResult<(VideoMetadata, PathBuf)> {
        let clock = StageClock::start(Stage::Download);
        let downloaded = self
            .objects
            .download(&spec.object_key, local_video, Some(&spec.object_bucket))
            .await;
        clock.finish(timings);
        downloaded?;
        self.update_stage(spec, Stage::Download, timings.clone()).await;

        let source = local_video.to_string_lossy().into_owned();
        let clock = StageClock::start(Stage::AudioExtraction);
        let extraction = async {
            let metadata = self.media.probe(&source).await?;
            let audio = self
                .media
                .extract_audio(&source, &temp_dir.join("audio.wav"))
                .await?;
            Ok::<_, PipelineError>((metadata, audio))
        }
        .await;
        clock.finish(timings);
        let (metadata, audio_path) = extraction?;
        self.update_stage(spec, Stage::AudioExtraction, timings.clone())
            .await;

        Ok((metadata, audio_path))
    }

    /// The single outer failure handler: upload the report, then write the
    /// terminal `failed` state.
    async fn handle_failure(
        &self,
        spec: &JobSpec,
        err: &PipelineError,
        timings: &StageTimings,
        temp_dir: &Path,
    ) {
        error!(job_id = %spec.job_id, %err, "job failed");

        let report_key = format!("results/{}/failure_report.json", spec.job_id);
        let report = json!({
            "job_id": spec.job_id.as_str(),
            "status": "failed",
            "error": err.to_string(),
            "traceback": err.trace(),
            "timings": timings,
        });

        let uploaded = async {
            tokio::fs::create_dir_all(temp_dir).await?;
            let report_path = temp_dir.join("failure_report.json");
            tokio::fs::write(&report_path, serde_json::to_vec_pretty(&report)?).await?;
            self.objects
                .upload(&report_path, &report_key, Some("application/json"), None)
                .await?;
            Ok::<_, PipelineError>(())
        }
        .await;

        let mut update = JobUpdate::new()
            .status(JobStatus::Failed)
            .current_stage(Stage::Failed)
            .error_message(err.to_string())
            .timings(timings.clone());
        match uploaded {
            Ok(()) => update = update.failure_report_key(report_key),
            Err(upload_err) => warn!(%upload_err, "failure report upload failed"),
        }
        self.push_update(&spec.job_id, update).await;
    }

    async fn update_stage(&self, spec: &JobSpec, stage: Stage, timings: StageTimings) {
        self.push_update(
            &spec.job_id,
            JobUpdate::new()
                .status(JobStatus::Processing)
                .current_stage(stage)
                .timings(timings),
        )
        .await;
    }

    async fn push_update(&self, job_id: &JobId, update: JobUpdate) {
        if let Err(err) = self.jobs.update(job_id, update).await {
            warn!(%job_id, %err, "state update failed");
        }
    }
}

/// Diarization then ASR, sequentially, on one branch task.
async fn run_audio_branch(
    diarizer: Arc<dyn SpeakerDiarizer>,
    recognizer: Arc<dyn SpeechRecognizer>,
    jobs: Arc<dyn JobStore>,
    job_id: JobId,
    audio_path: &Path,
    timings: &mut StageTimings,
) -> PipelineResult<Vec<AudioSegment>> {
    let clock = StageClock::start(Stage::Diarization);
    let output = diarizer.diarize(audio_path).await;
    clock.finish(timings);
    let spans = output
        .map_err(|e| PipelineError::stage_failed(Stage::Diarization, e.to_string()))?
        .into_spans();
    if spans.is_empty() {
        return Err(PipelineError::stage_failed(
            Stage::Diarization,
            "no speaker segments detected",
        ));
    }
    if let Err(err) = jobs
        .update(&job_id, JobUpdate::new().current_stage(Stage::Diarization))
        .await
    {
        warn!(%job_id, %err, "state update failed");
    }

    let clock = StageClock::start(Stage::Asr);
    let transcribed = recognizer.transcribe(audio_path, None).await;
    clock.finish(timings);
    let transcribed =
        transcribed.map_err(|e| PipelineError::stage_failed(Stage::Asr, e.to_string()))?;
    if transcribed.is_empty() {
        return Err(PipelineError::stage_failed(
            Stage::Asr,
            "no transcribed segments",
        ));
    }
    if let Err(err) = jobs
        .update(&job_id, JobUpdate::new().current_stage(Stage::Asr))
        .await
    {
        warn!(%job_id, %err, "state update failed");
    }

    Ok(merge_transcript_with_speakers(&transcribed, &spans))
}

/// Scene detection then keyframes, sequentially, on the other branch task.
#[allow(clippy::too_many_arguments)]
async fn run_scene_branch(
    scenes: Arc<dyn SceneDetector>,
    jobs: Arc<dyn JobStore>,
    job_id: JobId,
    video_path: &Path,
    keyframes_dir: &Path,
    threshold: f64,
    duration: f64,
    timings: &mut StageTimings,
) -> PipelineResult<(Vec<f64>, Vec<VideoFrame>)> {
    let clock = StageClock::start(Stage::SceneDetection);
    let detected = scenes.detect(video_path, threshold).await;
    clock.finish(timings);
    let mut boundaries =
        detected.map_err(|e| PipelineError::stage_failed(Stage::SceneDetection, e.to_string()))?;
    if let Err(err) = jobs
        .update(&job_id, JobUpdate::new().current_stage(Stage::SceneDetection))
        .await
    {
        warn!(%job_id, %err, "state update failed");
    }
    if boundaries.is_empty() {
        // A single continuous scene: the duration stands in as the boundary
        warn!("no scene boundaries detected, using video duration");
        boundaries = vec![duration];
    }

    let clock = StageClock::start(Stage::Keyframes);
    let frames = scenes
        .extract_keyframes(video_path, &boundaries, keyframes_dir)
        .await;
    clock.finish(timings);
    let frames =
        frames.map_err(|e| PipelineError::stage_failed(Stage::Keyframes, e.to_string()))?;
    if let Err(err) = jobs
        .update(&job_id, JobUpdate::new().current_stage(Stage::Keyframes))
        .await
    {
        warn!(%job_id, %err, "state update failed");
    }

    Ok((boundaries, frames))
}

/// Input keys carry a `uploads/<yyyymmdd_hhmmss>_<...>` prefix; derive the
/// diary date from it when present.
fn date_from_object_key(object_key: &str) -> Option<String> {
    let file_name = Path::new(object_key).file_name()?.to_str()?;
    let stamp: String = file_name.chars().take(8).collect();
    if stamp.len() == 8 && stamp.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("{}-{}-{}", &stamp[0..4], &stamp[4..6], &stamp[6..8]))
    } else {
        None
    }
}
