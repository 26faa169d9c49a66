use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

use vidiary_core::VideoFrame;

use crate::media::MediaProcessor;
use crate::{PipelineError, PipelineResult};

/// A full-scan scene pass decodes the whole file.
const SCENE_SCAN_TIMEOUT: Duration = Duration::from_secs(300);

/// Scene boundary detection and keyframe extraction.
#[async_trait]
pub trait SceneDetector: Send + Sync {
    /// Timestamps (seconds) where the content changes scene. The implicit
    /// boundary at 0 is not reported.
    async fn detect(&self, video_path: &Path, threshold: f64) -> PipelineResult<Vec<f64>>;

    /// Extract one keyframe per boundary timestamp.
    async fn extract_keyframes(
        &self,
        video_path: &Path,
        boundaries: &[f64],
        output_dir: &Path,
    ) -> PipelineResult<Vec<VideoFrame>>;
}

static PTS_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"pts_time:([0-9]+\.?[0-9]*)").expect("pts_time pattern"));

/// ffmpeg-backed detector: a single `select=gt(scene,T)` pass over the file,
/// then one seek per boundary for the keyframes.
pub struct FfmpegSceneDetector {
    media: Arc<dyn MediaProcessor>,
}

impl FfmpegSceneDetector {
    pub fn new(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media }
    }

    fn parse_scan_output(stderr: &str) -> Vec<f64> {
        let mut timestamps: Vec<f64> = stderr
            .lines()
            .filter_map(|line| PTS_TIME_RE.captures(line))
            .filter_map(|captures| captures.get(1)?.as_str().parse::<f64>().ok())
            .filter(|t| *t > 0.0)
            .collect();
        timestamps.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        timestamps.dedup_by(|a, b| (*a - *b).abs() < 0.01);
        timestamps
    }
}

#[async_trait]
impl SceneDetector for FfmpegSceneDetector {
    async fn detect(&self, video_path: &Path, threshold: f64) -> PipelineResult<Vec<f64>> {
        let video_str = video_path
            .to_str()
            .ok_or_else(|| PipelineError::media("non-utf8 video path"))?;
        let filter = format!("select='gt(scene,{threshold})',showinfo");

        debug!(video = video_str, threshold, "scanning for scene changes");
        let child = Command::new("ffmpeg")
            .args(["-i", video_str, "-vf", &filter, "-an", "-f", "null", "-"])
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(SCENE_SCAN_TIMEOUT, child)
            .await
            .map_err(|_| PipelineError::media("scene scan timed out"))?
            .map_err(|e| PipelineError::media(format!("ffmpeg failed to start: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::media(format!(
                "scene scan exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or_default()
            )));
        }

        // showinfo logs selected frames to stderr
        let stderr = String::from_utf8_lossy(&output.stderr);
        let boundaries = Self::parse_scan_output(&stderr);
        info!(count = boundaries.len(), "detected scene changes");
        Ok(boundaries)
    }

    async fn extract_keyframes(
        &self,
        video_path: &Path,
        boundaries: &[f64],
        output_dir: &Path,
    ) -> PipelineResult<Vec<VideoFrame>> {
        tokio::fs::create_dir_all(output_dir).await?;

        let mut frames = Vec::with_capacity(boundaries.len());
        for (index, &timestamp) in boundaries.iter().enumerate() {
            let output = output_dir.join(format!("keyframe_{index:04}.jpg"));
            self.media
                .extract_keyframe(video_path, timestamp, &output)
                .await?;
            frames.push(VideoFrame {
                timestamp,
                frame_path: output.display().to_string(),
                scene_change_detected: true,
            });
        }
        info!(count = frames.len(), "extracted keyframes");
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_output_parses_pts_times() {
        let stderr = "\
[Parsed_showinfo_1 @ 0x55] n:   0 pts:  12800 pts_time:5.12    pos: 1 fmt:yuv420p
[Parsed_showinfo_1 @ 0x55] n:   1 pts:  76250 pts_time:305.0   pos: 2 fmt:yuv420p
frame=  2 fps=0.0 q=-0.0 size=N/A";
        let boundaries = FfmpegSceneDetector::parse_scan_output(stderr);
        assert_eq!(boundaries, vec![5.12, 305.0]);
    }

    #[test]
    fn scan_output_drops_zero_and_duplicates() {
        let stderr = "\
pts_time:0.0
pts_time:10.5
pts_time:10.5
pts_time:8.25";
        let boundaries = FfmpegSceneDetector::parse_scan_output(stderr);
        assert_eq!(boundaries, vec![8.25, 10.5]);
    }

    #[test]
    fn empty_scan_output_gives_no_boundaries() {
        assert!(FfmpegSceneDetector::parse_scan_output("frame= 0").is_empty());
    }
}
