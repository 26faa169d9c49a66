use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use vidiary_core::VideoMetadata;

use crate::{PipelineError, PipelineResult};

/// Audio extraction covers a full decode; keyframes are single seeks.
pub const AUDIO_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(300);
pub const KEYFRAME_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Media extraction seam. `source` accepts a local path or a URL: the
/// decoder streams bytes directly from presigned URLs, which is what makes
/// the streaming intake overlap work.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    async fn probe(&self, source: &str) -> PipelineResult<VideoMetadata>;

    /// Extract the audio track as mono 16 kHz WAV, one decoder pass.
    async fn extract_audio(&self, source: &str, output: &Path) -> PipelineResult<PathBuf>;

    /// Extract a single frame at `timestamp` seconds.
    async fn extract_keyframe(
        &self,
        video_path: &Path,
        timestamp: f64,
        output: &Path,
    ) -> PipelineResult<()>;
}

/// ffmpeg/ffprobe-backed media processor.
#[derive(Debug, Clone, Default)]
pub struct FfmpegMedia;

impl FfmpegMedia {
    pub fn new() -> Self {
        Self
    }

    async fn run(
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> PipelineResult<Output> {
        debug!(program, ?args, "running media command");
        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| {
                PipelineError::media(format!("{program} timed out after {timeout:?}"))
            })?
            .map_err(|e| PipelineError::media(format!("{program} failed to start: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(PipelineError::media(format!(
                "{program} exited with {}: {tail}",
                output.status
            )));
        }
        Ok(output)
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    codec_name: Option<String>,
    r_frame_rate: Option<String>,
}

fn parse_frame_rate(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den > 0.0 {
                Some(num / den)
            } else {
                None
            }
        }
        None => raw.parse().ok(),
    }
}

#[async_trait]
impl MediaProcessor for FfmpegMedia {
    async fn probe(&self, source: &str) -> PipelineResult<VideoMetadata> {
        let output = Self::run(
            "ffprobe",
            &[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,codec_name,r_frame_rate",
                "-show_entries",
                "format=duration",
                "-of",
                "json",
                source,
            ],
            PROBE_TIMEOUT,
        )
        .await?;

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::media(format!("unparseable ffprobe output: {e}")))?;

        let duration = probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| PipelineError::bad_input(format!("no duration in {source}")))?;
        if duration <= 0.0 {
            return Err(PipelineError::bad_input(format!(
                "zero-length video: {source}"
            )));
        }

        let stream = probe.streams.into_iter().next();
        Ok(VideoMetadata {
            duration,
            width: stream.as_ref().and_then(|s| s.width),
            height: stream.as_ref().and_then(|s| s.height),
            fps: stream
                .as_ref()
                .and_then(|s| s.r_frame_rate.as_deref())
                .and_then(parse_frame_rate),
            codec: stream.and_then(|s| s.codec_name),
        })
    }

    async fn extract_audio(&self, source: &str, output: &Path) -> PipelineResult<PathBuf> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let output_str = output
            .to_str()
            .ok_or_else(|| PipelineError::media("non-utf8 audio output path"))?;

        // Single decoder pass: mono 16 kHz PCM keeps diarization and ASR on
        // one shared input and avoids per-consumer decode fallbacks.
        Self::run(
            "ffmpeg",
            &[
                "-y",
                "-i",
                source,
                "-vn",
                "-acodec",
                "pcm_s16le",
                "-ar",
                "16000",
                "-ac",
                "1",
                output_str,
            ],
            AUDIO_EXTRACTION_TIMEOUT,
        )
        .await?;

        info!(source, output = %output.display(), "extracted audio track");
        Ok(output.to_path_buf())
    }

    async fn extract_keyframe(
        &self,
        video_path: &Path,
        timestamp: f64,
        output: &Path,
    ) -> PipelineResult<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let video_str = video_path
            .to_str()
            .ok_or_else(|| PipelineError::media("non-utf8 video path"))?;
        let output_str = output
            .to_str()
            .ok_or_else(|| PipelineError::media("non-utf8 keyframe output path"))?;
        let seek = format!("{timestamp:.3}");

        Self::run(
            "ffmpeg",
            &[
                "-y", "-ss", &seek, "-i", video_str, "-frames:v", "1", "-q:v", "2", output_str,
            ],
            KEYFRAME_TIMEOUT,
        )
        .await?;
        Ok(())
    }
}
