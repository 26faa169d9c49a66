use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A diarized, transcribed span of speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSegment {
    /// Seconds from the start of the video
    pub start_time: f64,
    pub end_time: f64,
    /// Normalized speaker label, e.g. `Speaker_01`
    pub speaker_id: String,
    pub transcript_text: Option<String>,
}

impl AudioSegment {
    /// True if this segment overlaps the half-open window `[start, end)`.
    pub fn overlaps(&self, window_start: f64, window_end: f64) -> bool {
        self.start_time < window_end && self.end_time > window_start
    }
}

/// A keyframe extracted at or near a scene boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    /// Seconds from the start of the video
    pub timestamp: f64,
    pub frame_path: String,
    pub scene_change_detected: bool,
}

/// A speaker appearing in a time block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub speaker_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub real_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Participant {
    pub fn new(speaker_id: impl Into<String>) -> Self {
        Self {
            speaker_id: speaker_id.into(),
            real_name: None,
            role: None,
        }
    }
}

/// How much the block's content can be trusted, based on available evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceReliability {
    High,
    Medium,
    Low,
}

/// Basic container metadata probed from the input video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Duration in seconds
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
}

/// One summarized window of the day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeBlock {
    /// Wall-clock style offset, `HH:MM` from the start of the video
    pub start_time: String,
    pub end_time: String,
    pub activity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub source_reliability: SourceReliability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_meeting: Option<bool>,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_summary: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub per_speaker_summary: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_summary: Option<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub audio_segments: Vec<AudioSegment>,
    #[serde(default)]
    pub video_frames: Vec<VideoFrame>,
}

impl TimeBlock {
    /// Unique speaker ids across segments and participants, sorted.
    pub fn speakers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .audio_segments
            .iter()
            .map(|s| s.speaker_id.clone())
            .chain(self.participants.iter().map(|p| p.speaker_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// The structured output of a completed job; uploaded as `summary.json` and
/// rendered to `summary.md`. The JSON shape is stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    /// `YYYY-MM-DD`
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_source: Option<String>,
    pub time_blocks: Vec<TimeBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_metadata: Option<VideoMetadata>,
    /// Seconds covered by the summary
    pub total_duration: f64,
    pub created_at: DateTime<Utc>,
}

impl DailySummary {
    /// Render the diary document uploaded alongside the JSON artifact.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Daily Summary - {}\n\n", self.date));
        if let Some(source) = &self.video_source {
            out.push_str(&format!("Source: `{}`\n\n", source));
        }
        out.push_str(&format!(
            "Total duration: {}\n\n",
            format_timestamp(self.total_duration)
        ));

        for block in &self.time_blocks {
            out.push_str(&format!(
                "## {} - {}: {}\n",
                block.start_time, block.end_time, block.activity
            ));
            if let Some(location) = &block.location {
                out.push_str(&format!("* **Location:** {}\n", location));
            }
            out.push_str(&format!(
                "* **Source Reliability:** {:?}\n",
                block.source_reliability
            ));
            if let Some(context_type) = &block.context_type {
                out.push_str(&format!("* **Context:** {}\n", context_type));
            }
            if !block.participants.is_empty() {
                out.push_str("* **Participants:**\n");
                for p in &block.participants {
                    match &p.real_name {
                        Some(name) => {
                            out.push_str(&format!("  * **{}:** {}\n", p.speaker_id, name))
                        }
                        None => out.push_str(&format!("  * **{}**\n", p.speaker_id)),
                    }
                }
            }
            if let Some(summary) = &block.transcript_summary {
                out.push_str(&format!("* **Transcript Summary:** {}\n", summary));
            }
            if !block.per_speaker_summary.is_empty() {
                out.push_str("* **Per-Speaker Summary:**\n");
                for (speaker, text) in &block.per_speaker_summary {
                    out.push_str(&format!("  * **{}:** {}\n", speaker, text));
                }
            }
            if let Some(visual) = &block.visual_summary {
                out.push_str(&format!("* **Visual Summary:** {}\n", visual));
            }
            if !block.action_items.is_empty() {
                out.push_str("* **Action Items:**\n");
                for item in &block.action_items {
                    out.push_str(&format!("  * [ ] {}\n", item));
                }
            }
            out.push('\n');
        }

        out
    }
}

/// Format seconds as `HH:MM`.
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 3600, (total % 3600) / 60)
}

/// Format seconds as `HH:MM:SS`.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Parse `HH:MM` or `HH:MM:SS` back into seconds. Returns 0 for malformed
/// input rather than failing, matching the tolerant artifact readers.
pub fn parse_clock(value: &str) -> f64 {
    let mut parts = value.trim().split(':');
    let hours: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minutes: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let seconds: u64 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (hours * 3600 + minutes * 60 + seconds) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> TimeBlock {
        TimeBlock {
            start_time: "00:00".to_string(),
            end_time: "00:05".to_string(),
            activity: "Morning stand-up".to_string(),
            location: Some("Office".to_string()),
            source_reliability: SourceReliability::High,
            context_type: Some("meeting".to_string()),
            is_meeting: Some(true),
            participants: vec![Participant::new("Speaker_01")],
            transcript_summary: Some("Discussed the release plan.".to_string()),
            per_speaker_summary: BTreeMap::new(),
            visual_summary: Some("Whiteboard with sprint board".to_string()),
            action_items: vec!["Ship the release notes".to_string()],
            audio_segments: vec![AudioSegment {
                start_time: 1.0,
                end_time: 4.0,
                speaker_id: "Speaker_01".to_string(),
                transcript_text: Some("Let's get started.".to_string()),
            }],
            video_frames: vec![],
        }
    }

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(0.0), "00:00");
        assert_eq!(format_clock(305.0), "00:05");
        assert_eq!(format_clock(3725.0), "01:02");
        assert_eq!(format_timestamp(3725.0), "01:02:05");
    }

    #[test]
    fn clock_parse_round_trip() {
        assert_eq!(parse_clock("00:05"), 300.0);
        assert_eq!(parse_clock("01:02:05"), 3725.0);
        assert_eq!(parse_clock("garbage"), 0.0);
    }

    #[test]
    fn segment_overlap_is_half_open() {
        let seg = AudioSegment {
            start_time: 290.0,
            end_time: 310.0,
            speaker_id: "Speaker_01".to_string(),
            transcript_text: None,
        };
        assert!(seg.overlaps(0.0, 300.0));
        assert!(seg.overlaps(300.0, 600.0));
        assert!(!seg.overlaps(310.0, 600.0));
        assert!(!seg.overlaps(0.0, 290.0));
    }

    #[test]
    fn summary_json_round_trips() {
        let summary = DailySummary {
            date: "2026-01-20".to_string(),
            video_source: Some("s3://bucket/uploads/video.mp4".to_string()),
            time_blocks: vec![sample_block()],
            video_metadata: Some(VideoMetadata {
                duration: 600.0,
                width: Some(1920),
                height: Some(1080),
                fps: Some(30.0),
                codec: Some("h264".to_string()),
            }),
            total_duration: 600.0,
            created_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&summary).unwrap();
        let back: DailySummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.time_blocks.len(), 1);
        assert_eq!(back.time_blocks[0].activity, "Morning stand-up");
        assert_eq!(back.total_duration, 600.0);
    }

    #[test]
    fn markdown_contains_block_structure() {
        let summary = DailySummary {
            date: "2026-01-20".to_string(),
            video_source: None,
            time_blocks: vec![sample_block()],
            video_metadata: None,
            total_duration: 300.0,
            created_at: Utc::now(),
        };
        let md = summary.to_markdown();
        assert!(md.contains("# Daily Summary - 2026-01-20"));
        assert!(md.contains("## 00:00 - 00:05: Morning stand-up"));
        assert!(md.contains("* **Location:** Office"));
        assert!(md.contains("* [ ] Ship the release notes"));
    }

    #[test]
    fn speakers_are_deduped_and_sorted() {
        let mut block = sample_block();
        block.participants.push(Participant::new("Speaker_02"));
        block.participants.push(Participant::new("Speaker_01"));
        assert_eq!(block.speakers(), vec!["Speaker_01", "Speaker_02"]);
    }
}
