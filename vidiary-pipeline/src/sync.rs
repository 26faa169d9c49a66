use tracing::{debug, info};

use vidiary_core::{AudioSegment, VideoFrame};

/// One contiguous window of the video timeline: the unit of summarization.
#[derive(Debug, Clone)]
pub struct SyncWindow {
    pub start: f64,
    pub end: f64,
    pub audio_segments: Vec<AudioSegment>,
    pub video_frames: Vec<VideoFrame>,
}

impl SyncWindow {
    pub fn is_empty(&self) -> bool {
        self.audio_segments.is_empty() && self.video_frames.is_empty()
    }
}

/// Align audio segments and keyframes into fixed-duration windows.
///
/// The timeline is `[0, end]` where `end` is the larger of the video
/// duration and any observed timestamp. Windows are `[0, W), [W, 2W), ...`,
/// the final window possibly shorter. A segment lands in every window it
/// overlaps. A keyframe lands in every window its owning scene (the
/// half-open interval between consecutive scene boundaries) overlaps; when
/// scene metadata is absent, keyframes are assigned by timestamp, with the
/// final keyframe also included when it sits on the last window's right
/// edge.
pub fn synchronize(
    audio_segments: &[AudioSegment],
    video_frames: &[VideoFrame],
    scene_boundaries: &[f64],
    video_duration: f64,
    window_seconds: f64,
) -> Vec<SyncWindow> {
    let window_seconds = if window_seconds > 0.0 {
        window_seconds
    } else {
        300.0
    };

    let mut end = video_duration.max(0.0);
    for segment in audio_segments {
        end = end.max(segment.end_time);
    }
    for frame in video_frames {
        end = end.max(frame.timestamp);
    }
    if end <= 0.0 {
        return Vec::new();
    }

    // Scenes: [0, b1), [b1, b2), ..., [bk, end)
    let scenes: Vec<(f64, f64)> = if scene_boundaries.is_empty() {
        Vec::new()
    } else {
        let mut bounds: Vec<f64> = scene_boundaries
            .iter()
            .copied()
            .filter(|b| *b > 0.0 && *b < end)
            .collect();
        bounds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        bounds.dedup();
        let mut edges = Vec::with_capacity(bounds.len() + 2);
        edges.push(0.0);
        edges.extend(bounds);
        edges.push(end);
        edges.windows(2).map(|pair| (pair[0], pair[1])).collect()
    };

    let owning_scene = |timestamp: f64| -> Option<(f64, f64)> {
        scenes
            .iter()
            .copied()
            .find(|(start, stop)| timestamp >= *start && (timestamp < *stop || *stop == end))
    };

    let mut windows = Vec::new();
    let mut window_start = 0.0;
    while window_start < end {
        let window_end = (window_start + window_seconds).min(end);

        let segments: Vec<AudioSegment> = audio_segments
            .iter()
            .filter(|segment| segment.overlaps(window_start, window_end))
            .cloned()
            .collect();

        let is_last = window_end >= end;
        let frames: Vec<VideoFrame> = video_frames
            .iter()
            .filter(|frame| {
                if scenes.is_empty() {
                    // Timestamp rule with right-edge inclusion in the final window
                    (frame.timestamp >= window_start && frame.timestamp < window_end)
                        || (is_last && frame.timestamp == window_end)
                } else {
                    match owning_scene(frame.timestamp) {
                        Some((scene_start, scene_end)) => {
                            scene_start < window_end && scene_end > window_start
                        }
                        None => false,
                    }
                }
            })
            .cloned()
            .collect();

        debug!(
            window_start,
            window_end,
            segments = segments.len(),
            frames = frames.len(),
            "built sync window"
        );
        windows.push(SyncWindow {
            start: window_start,
            end: window_end,
            audio_segments: segments,
            video_frames: frames,
        });
        window_start = window_end;
    }

    info!(count = windows.len(), end, "synchronized windows");
    windows
}
