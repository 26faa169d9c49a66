use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use vidiary_core::summary::{format_clock, format_timestamp};
use vidiary_core::{
    DailySummary, Participant, SourceReliability, TimeBlock, VideoMetadata,
};

use crate::collab::LanguageModel;
use crate::retry::with_rate_limit_retry;
use crate::sync::SyncWindow;
use crate::PipelineResult;

const SYSTEM_PROMPT: &str = "You are a diary summarization system. Given audio transcripts and visual context,\n\
generate a structured daily log entry in Markdown format.\n\n\
Required format:\n\
## [START_TIME] - [END_TIME]: [Activity Title]\n\
* **Location:** [inferred from visuals]\n\
* **Source Reliability:** [High/Medium/Low]\n\
* **Participants:**\n\
  * **Speaker_01:** [name if known, else \"Speaker_01\"]\n\
* **Transcript Summary:** [concise summary]\n\
* **Visual Summary:** [what the frames show]\n\
* **Action Items:**\n\
  * [ ] [item description]\n\n\
Be concise and factual. Infer locations from visual context when possible.";

/// Minimum evidence for a meeting: more than one voice and an actual
/// back-and-forth.
const MEETING_MIN_SPEAKERS: usize = 2;
const MEETING_MIN_SEGMENTS: usize = 4;

/// One language-model request per non-empty window, tolerant parsing of the
/// response, placeholders for windows with nothing in them.
pub struct Summarizer {
    llm: Arc<dyn LanguageModel>,
    max_retries: u32,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LanguageModel>, max_retries: u32) -> Self {
        Self { llm, max_retries }
    }

    /// Summarize every window into a daily summary. Windows are processed in
    /// order; each non-empty window costs exactly one model call (plus
    /// rate-limit retries).
    pub async fn create_daily_summary(
        &self,
        windows: &[SyncWindow],
        date: &str,
        video_source: Option<String>,
        video_metadata: Option<VideoMetadata>,
    ) -> PipelineResult<DailySummary> {
        let mut time_blocks = Vec::with_capacity(windows.len());
        for window in windows {
            time_blocks.push(self.summarize_window(window).await?);
        }

        let total_duration = windows.last().map(|w| w.end).unwrap_or(0.0);
        info!(blocks = time_blocks.len(), total_duration, "built daily summary");
        Ok(DailySummary {
            date: date.to_string(),
            video_source,
            time_blocks,
            video_metadata,
            total_duration,
            created_at: Utc::now(),
        })
    }

    /// Summarize one window. Empty windows bypass the model entirely.
    pub async fn summarize_window(&self, window: &SyncWindow) -> PipelineResult<TimeBlock> {
        if window.is_empty() {
            debug!(start = window.start, "empty window, skipping model call");
            return Ok(placeholder_block(window));
        }

        let user_prompt = build_prompt(window);
        let response = with_rate_limit_retry(self.max_retries, || {
            self.llm.summarize(SYSTEM_PROMPT, &user_prompt)
        })
        .await?;

        Ok(parse_response(&response, window))
    }
}

fn build_prompt(window: &SyncWindow) -> String {
    let mut lines = vec!["Audio Transcript:".to_string()];
    if window.audio_segments.is_empty() {
        lines.push("[No audio segments in this time window]".to_string());
    } else {
        for segment in &window.audio_segments {
            let transcript = segment.transcript_text.as_deref().unwrap_or("[no transcript]");
            lines.push(format!(
                "[{}] ({}-{}): {}",
                segment.speaker_id,
                format_timestamp(segment.start_time),
                format_timestamp(segment.end_time),
                transcript
            ));
        }
    }

    lines.push(String::new());
    lines.push("Visual Context:".to_string());
    if window.video_frames.is_empty() {
        lines.push("[No video frames in this time window]".to_string());
    } else {
        for frame in &window.video_frames {
            let kind = if frame.scene_change_detected {
                "Scene change detected"
            } else {
                "Keyframe"
            };
            let name = Path::new(&frame.frame_path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| frame.frame_path.clone());
            lines.push(format!(
                "* {}: {} (frame: {})",
                format_timestamp(frame.timestamp),
                kind,
                name
            ));
        }
    }

    lines.join("\n")
}

fn participants_for(window: &SyncWindow) -> Vec<Participant> {
    let mut speakers: Vec<String> = window
        .audio_segments
        .iter()
        .map(|s| s.speaker_id.clone())
        .collect();
    speakers.sort();
    speakers.dedup();
    speakers.into_iter().map(Participant::new).collect()
}

fn derived_reliability(window: &SyncWindow) -> SourceReliability {
    if window.audio_segments.len() > 5 && window.video_frames.len() > 3 {
        SourceReliability::High
    } else if window.audio_segments.len() < 2 || window.video_frames.is_empty() {
        SourceReliability::Low
    } else {
        SourceReliability::Medium
    }
}

fn meeting_metadata(window: &SyncWindow) -> (Option<String>, Option<bool>) {
    let speakers = participants_for(window).len();
    if speakers >= MEETING_MIN_SPEAKERS && window.audio_segments.len() >= MEETING_MIN_SEGMENTS {
        (Some("meeting".to_string()), Some(true))
    } else if speakers >= 1 {
        (Some("solo".to_string()), Some(false))
    } else {
        (Some("ambient".to_string()), Some(false))
    }
}

fn placeholder_block(window: &SyncWindow) -> TimeBlock {
    TimeBlock {
        start_time: format_clock(window.start),
        end_time: format_clock(window.end),
        activity: "No recorded activity".to_string(),
        location: None,
        source_reliability: SourceReliability::Low,
        context_type: Some("ambient".to_string()),
        is_meeting: Some(false),
        participants: Vec::new(),
        transcript_summary: None,
        per_speaker_summary: BTreeMap::new(),
        visual_summary: None,
        action_items: Vec::new(),
        audio_segments: Vec::new(),
        video_frames: Vec::new(),
    }
}

/// Parse the model's Markdown response into a time block. Tolerant by
/// construction: every missing field falls back to a sensible default, and a
/// literal placeholder activity is replaced by the start of the window's
/// transcript.
fn parse_response(response: &str, window: &SyncWindow) -> TimeBlock {
    let mut activity = parse_activity(response).unwrap_or_else(|| "Activity".to_string());
    if activity == "Activity" {
        if let Some(prefix) = transcript_prefix(window) {
            activity = prefix;
        }
    }

    let (context_type, is_meeting) = meeting_metadata(window);
    TimeBlock {
        start_time: format_clock(window.start),
        end_time: format_clock(window.end),
        activity,
        location: parse_field(response, "**Location:**"),
        source_reliability: parse_field(response, "**Source Reliability:**")
            .and_then(|raw| match raw.as_str() {
                "High" => Some(SourceReliability::High),
                "Medium" => Some(SourceReliability::Medium),
                "Low" => Some(SourceReliability::Low),
                _ => None,
            })
            .unwrap_or_else(|| derived_reliability(window)),
        context_type,
        is_meeting,
        participants: participants_for(window),
        transcript_summary: parse_field(response, "**Transcript Summary:**"),
        per_speaker_summary: parse_speaker_section(response),
        visual_summary: parse_field(response, "**Visual Summary:**"),
        action_items: parse_action_items(response),
        audio_segments: window.audio_segments.clone(),
        video_frames: window.video_frames.clone(),
    }
}

fn parse_activity(response: &str) -> Option<String> {
    let line = response.lines().find(|line| line.starts_with("##"))?;
    let text = line.trim_start_matches('#').trim();
    let activity = match text.rsplit_once(':') {
        Some((_, tail)) => tail.trim(),
        None => text,
    };
    if activity.is_empty() {
        None
    } else {
        Some(activity.to_string())
    }
}

fn parse_field(response: &str, marker: &str) -> Option<String> {
    let line = response.lines().find(|line| line.contains(marker))?;
    let value = line.split(marker).nth(1)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_action_items(response: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut in_section = false;
    for line in response.lines() {
        if line.contains("**Action Items:**") {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        let trimmed = line.trim();
        if trimmed.starts_with('*') || trimmed.starts_with('-') {
            // A bullet carrying a field marker belongs to the next section
            if trimmed.contains(":**") {
                break;
            }
            let item = trimmed
                .trim_start_matches(['*', '-'])
                .trim()
                .trim_start_matches("[ ]")
                .trim_start_matches("[x]")
                .trim();
            if !item.is_empty() {
                items.push(item.to_string());
            }
        } else if !trimmed.is_empty() {
            break;
        }
    }
    items
}

fn parse_speaker_section(response: &str) -> BTreeMap<String, String> {
    let mut summaries = BTreeMap::new();
    let mut in_section = false;
    for line in response.lines() {
        if line.contains("**Per-Speaker Summary:**") {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        // Section entries are indented; a top-level line ends the section
        if !line.starts_with(' ') {
            break;
        }
        let trimmed = line.trim().trim_start_matches('*').trim();
        if let Some(rest) = trimmed.strip_prefix("**") {
            if let Some((speaker, text)) = rest.split_once(":**") {
                let text = text.trim();
                if !text.is_empty() {
                    summaries.insert(speaker.trim().to_string(), text.to_string());
                }
            }
        }
    }
    summaries
}

fn transcript_prefix(window: &SyncWindow) -> Option<String> {
    let text = window
        .audio_segments
        .iter()
        .find_map(|s| s.transcript_text.as_deref().filter(|t| !t.trim().is_empty()))?;
    let mut prefix: String = text.trim().chars().take(60).collect();
    if prefix.len() < text.trim().len() {
        prefix.push_str("...");
    }
    Some(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use vidiary_core::{AudioSegment, VideoFrame};

    fn window_with(segments: usize, frames: usize) -> SyncWindow {
        SyncWindow {
            start: 0.0,
            end: 300.0,
            audio_segments: (0..segments)
                .map(|i| AudioSegment {
                    start_time: i as f64 * 10.0,
                    end_time: i as f64 * 10.0 + 5.0,
                    speaker_id: format!("Speaker_{:02}", (i % 2) + 1),
                    transcript_text: Some(format!("utterance number {i}")),
                })
                .collect(),
            video_frames: (0..frames)
                .map(|i| VideoFrame {
                    timestamp: i as f64 * 30.0,
                    frame_path: format!("/tmp/frames/keyframe_{i:04}.jpg"),
                    scene_change_detected: true,
                })
                .collect(),
        }
    }

    const RESPONSE: &str = "\
## 00:00 - 00:05: Sprint planning
* **Location:** Conference room
* **Source Reliability:** High
* **Participants:**
  * **Speaker_01:** Speaker_01
* **Transcript Summary:** Planned the sprint and assigned owners.
* **Per-Speaker Summary:**
  * **Speaker_01:** Walked through the backlog.
  * **Speaker_02:** Raised the deadline risk.
* **Visual Summary:** Whiteboard with a sprint board.
* **Action Items:**
  * [ ] Book the demo room
  * [ ] Send the notes
";

    #[test]
    fn parses_full_response() {
        let block = parse_response(RESPONSE, &window_with(5, 2));
        assert_eq!(block.activity, "Sprint planning");
        assert_eq!(block.location.as_deref(), Some("Conference room"));
        assert_eq!(block.source_reliability, SourceReliability::High);
        assert_eq!(
            block.transcript_summary.as_deref(),
            Some("Planned the sprint and assigned owners.")
        );
        assert_eq!(
            block.visual_summary.as_deref(),
            Some("Whiteboard with a sprint board.")
        );
        assert_eq!(
            block.action_items,
            vec!["Book the demo room".to_string(), "Send the notes".to_string()]
        );
        assert_eq!(
            block.per_speaker_summary.get("Speaker_01").map(String::as_str),
            Some("Walked through the backlog.")
        );
        assert_eq!(block.start_time, "00:00");
        assert_eq!(block.end_time, "00:05");
    }

    #[test]
    fn placeholder_activity_is_replaced_by_transcript_prefix() {
        let response = "## 00:00 - 00:05: Activity\n* **Location:** here";
        let block = parse_response(response, &window_with(2, 0));
        assert_eq!(block.activity, "utterance number 0");
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let block = parse_response("totally unstructured reply", &window_with(1, 0));
        // No activity heading and only one sparse segment
        assert_eq!(block.activity, "utterance number 0");
        assert!(block.location.is_none());
        assert_eq!(block.source_reliability, SourceReliability::Low);
        assert!(block.action_items.is_empty());
    }

    #[test]
    fn reliability_is_derived_when_not_stated() {
        let block = parse_response("## 00:00 - 00:05: Demo", &window_with(6, 4));
        assert_eq!(block.source_reliability, SourceReliability::High);
        let block = parse_response("## 00:00 - 00:05: Demo", &window_with(3, 1));
        assert_eq!(block.source_reliability, SourceReliability::Medium);
    }

    #[test]
    fn meeting_detection_uses_speakers_and_density() {
        let (context, meeting) = meeting_metadata(&window_with(4, 0));
        assert_eq!(context.as_deref(), Some("meeting"));
        assert_eq!(meeting, Some(true));

        let (context, meeting) = meeting_metadata(&window_with(1, 0));
        assert_eq!(context.as_deref(), Some("solo"));
        assert_eq!(meeting, Some(false));

        let (context, meeting) = meeting_metadata(&window_with(0, 2));
        assert_eq!(context.as_deref(), Some("ambient"));
        assert_eq!(meeting, Some(false));
    }

    struct CountingLlm {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for CountingLlm {
        async fn summarize(&self, _system: &str, _user: &str) -> PipelineResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RESPONSE.to_string())
        }
    }

    #[tokio::test]
    async fn empty_windows_bypass_the_model() {
        let llm = Arc::new(CountingLlm {
            calls: AtomicUsize::new(0),
        });
        let summarizer = Summarizer::new(llm.clone(), 3);

        let windows = vec![window_with(0, 0), window_with(3, 1)];
        let summary = summarizer
            .create_daily_summary(&windows, "2026-01-20", None, None)
            .await
            .unwrap();

        assert_eq!(summary.time_blocks.len(), 2);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.time_blocks[0].activity, "No recorded activity");
        assert_eq!(summary.time_blocks[0].source_reliability, SourceReliability::Low);
        assert_eq!(summary.time_blocks[1].activity, "Sprint planning");
        assert_eq!(summary.total_duration, 300.0);
    }

    #[test]
    fn prompt_includes_transcript_and_frames() {
        let prompt = build_prompt(&window_with(1, 1));
        assert!(prompt.contains("Audio Transcript:"));
        assert!(prompt.contains("[Speaker_01] (00:00:00-00:00:05): utterance number 0"));
        assert!(prompt.contains("Visual Context:"));
        assert!(prompt.contains("Scene change detected (frame: keyframe_0000.jpg)"));
    }

    #[test]
    fn prompt_marks_missing_modalities() {
        let prompt = build_prompt(&window_with(0, 1));
        assert!(prompt.contains("[No audio segments in this time window]"));
        let prompt = build_prompt(&window_with(1, 0));
        assert!(prompt.contains("[No video frames in this time window]"));
    }
}
