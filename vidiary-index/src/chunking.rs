use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use vidiary_core::summary::parse_clock;
use vidiary_core::{DailySummary, TimeBlock};

/// Chunk texts are capped so one chunk stays one embedding unit.
pub const MAX_CHUNK_CHARS: usize = 1000;

/// Transcript chunks carry at most this many excerpts.
const MAX_TRANSCRIPT_SEGMENTS: usize = 10;

/// What a chunk was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SummaryBlock,
    TranscriptBlock,
    ActionItem,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SummaryBlock => "summary_block",
            Self::TranscriptBlock => "transcript_block",
            Self::ActionItem => "action_item",
        }
    }
}

/// A unit of vector-indexable content derived from one job's summary.
///
/// Metadata is flat and denormalized; a chunk never references its parent
/// summary object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from video identity, position, and kind
    pub chunk_id: String,
    /// `object_bucket/object_key` of the source video
    pub video_id: String,
    pub date: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub speakers: Vec<String>,
    pub source_kind: SourceKind,
    pub text: String,
    pub metadata: serde_json::Value,
}

impl Chunk {
    /// Flat metadata document stored alongside the vector.
    pub fn to_metadata(&self) -> serde_json::Value {
        json!({
            "id": self.chunk_id,
            "video_id": self.video_id,
            "date": self.date,
            "start_time": self.start_seconds,
            "end_time": self.end_seconds,
            "speakers": self.speakers,
            "source_type": self.source_kind.as_str(),
            "metadata": self.metadata,
            "text": self.text,
        })
    }
}

fn chunk_id(
    video_id: &str,
    date: &str,
    start: f64,
    end: f64,
    kind: SourceKind,
    index: usize,
) -> String {
    let base = format!(
        "{}|{}|{:.2}|{:.2}|{}|{}",
        video_id,
        date,
        start,
        end,
        kind.as_str(),
        index
    );
    let digest = Sha256::digest(base.as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("chunk_{hex}")
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_CHUNK_CHARS {
        let mut cut = MAX_CHUNK_CHARS - 3;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

fn summary_text(block: &TimeBlock) -> String {
    let mut lines = vec![format!(
        "{} - {}: {}",
        block.start_time, block.end_time, block.activity
    )];
    if let Some(location) = &block.location {
        lines.push(format!("Location: {location}"));
    }
    if !block.per_speaker_summary.is_empty() {
        lines.push("Per-speaker summary:".to_string());
        for (speaker, text) in &block.per_speaker_summary {
            lines.push(format!("  {speaker}: {text}"));
        }
    } else if let Some(summary) = &block.transcript_summary {
        lines.push(format!("Summary: {summary}"));
    }
    if let Some(visual) = &block.visual_summary {
        lines.push(format!("Visual: {visual}"));
    }
    if !block.action_items.is_empty() {
        lines.push("Action items:".to_string());
        for item in &block.action_items {
            lines.push(format!("- {item}"));
        }
    }
    lines.join("\n")
}

fn transcript_text(block: &TimeBlock) -> Option<String> {
    if block.audio_segments.is_empty() {
        return None;
    }
    let mut lines = vec!["Transcript excerpts:".to_string()];
    for segment in block.audio_segments.iter().take(MAX_TRANSCRIPT_SEGMENTS) {
        let content = segment.transcript_text.as_deref().unwrap_or("[no transcript]");
        lines.push(format!("[{}] {}", segment.speaker_id, content));
    }
    Some(lines.join("\n"))
}

fn base_metadata(block: &TimeBlock) -> serde_json::Value {
    json!({
        "activity": block.activity,
        "location": block.location,
        "source_reliability": block.source_reliability,
        "participant_count": block.participants.len(),
        "audio_segment_count": block.audio_segments.len(),
        "video_frame_count": block.video_frames.len(),
    })
}

/// Derive chunks from a summary. Per time block: one summary chunk, one
/// transcript chunk when the block has audio, and one chunk per action item.
pub fn chunks_from_summary(summary: &DailySummary, video_id: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (index, block) in summary.time_blocks.iter().enumerate() {
        let start = parse_clock(&block.start_time);
        let end = parse_clock(&block.end_time);
        let speakers = block.speakers();

        chunks.push(Chunk {
            chunk_id: chunk_id(
                video_id,
                &summary.date,
                start,
                end,
                SourceKind::SummaryBlock,
                index * 2,
            ),
            video_id: video_id.to_string(),
            date: summary.date.clone(),
            start_seconds: start,
            end_seconds: end,
            speakers: speakers.clone(),
            source_kind: SourceKind::SummaryBlock,
            text: truncate(summary_text(block)),
            metadata: base_metadata(block),
        });

        if let Some(text) = transcript_text(block) {
            let mut metadata = base_metadata(block);
            metadata["has_transcript"] = json!(true);
            chunks.push(Chunk {
                chunk_id: chunk_id(
                    video_id,
                    &summary.date,
                    start,
                    end,
                    SourceKind::TranscriptBlock,
                    index * 2 + 1,
                ),
                video_id: video_id.to_string(),
                date: summary.date.clone(),
                start_seconds: start,
                end_seconds: end,
                speakers: speakers.clone(),
                source_kind: SourceKind::TranscriptBlock,
                text: truncate(text),
                metadata,
            });
        }

        for (item_index, item) in block.action_items.iter().enumerate() {
            let mut metadata = base_metadata(block);
            metadata["is_action_item"] = json!(true);
            chunks.push(Chunk {
                chunk_id: chunk_id(
                    video_id,
                    &summary.date,
                    start,
                    end,
                    SourceKind::ActionItem,
                    (index + 1) * 100 + item_index,
                ),
                video_id: video_id.to_string(),
                date: summary.date.clone(),
                start_seconds: start,
                end_seconds: end,
                speakers: speakers.clone(),
                source_kind: SourceKind::ActionItem,
                text: truncate(format!("Action item: {item}")),
                metadata,
            });
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use vidiary_core::{AudioSegment, Participant, SourceReliability};

    fn block(with_audio: bool, action_items: Vec<String>) -> TimeBlock {
        TimeBlock {
            start_time: "00:00".to_string(),
            end_time: "00:05".to_string(),
            activity: "Code review".to_string(),
            location: Some("Desk".to_string()),
            source_reliability: SourceReliability::Medium,
            context_type: None,
            is_meeting: None,
            participants: vec![Participant::new("Speaker_01")],
            transcript_summary: Some("Walked through the diff.".to_string()),
            per_speaker_summary: BTreeMap::new(),
            visual_summary: None,
            action_items,
            audio_segments: if with_audio {
                vec![AudioSegment {
                    start_time: 10.0,
                    end_time: 20.0,
                    speaker_id: "Speaker_01".to_string(),
                    transcript_text: Some("Looks good to me.".to_string()),
                }]
            } else {
                vec![]
            },
            video_frames: vec![],
        }
    }

    fn summary(blocks: Vec<TimeBlock>) -> DailySummary {
        DailySummary {
            date: "2026-01-20".to_string(),
            video_source: Some("s3://bucket/uploads/v.mp4".to_string()),
            time_blocks: blocks,
            video_metadata: None,
            total_duration: 300.0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn one_block_with_audio_and_items_yields_expected_chunks() {
        let s = summary(vec![block(true, vec!["Follow up on flaky test".to_string()])]);
        let chunks = chunks_from_summary(&s, "bucket/uploads/v.mp4");
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].source_kind, SourceKind::SummaryBlock);
        assert_eq!(chunks[1].source_kind, SourceKind::TranscriptBlock);
        assert_eq!(chunks[2].source_kind, SourceKind::ActionItem);
        assert!(chunks[2].text.starts_with("Action item:"));
    }

    #[test]
    fn block_without_audio_skips_transcript_chunk() {
        let s = summary(vec![block(false, vec![])]);
        let chunks = chunks_from_summary(&s, "v");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_kind, SourceKind::SummaryBlock);
    }

    #[test]
    fn chunk_ids_are_deterministic_across_reparse() {
        let s = summary(vec![block(true, vec!["Do the thing".to_string()])]);
        let first = chunks_from_summary(&s, "bucket/uploads/v.mp4");

        // Round-trip through JSON, as re-indexing a stored artifact would
        let raw = serde_json::to_string(&s).unwrap();
        let reparsed: DailySummary = serde_json::from_str(&raw).unwrap();
        let second = chunks_from_summary(&reparsed, "bucket/uploads/v.mp4");

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.chunk_id, b.chunk_id);
            assert_eq!(a.text, b.text);
        }
    }

    #[test]
    fn different_videos_get_different_ids() {
        let s = summary(vec![block(true, vec![])]);
        let a = chunks_from_summary(&s, "bucket/a.mp4");
        let b = chunks_from_summary(&s, "bucket/b.mp4");
        assert_ne!(a[0].chunk_id, b[0].chunk_id);
    }

    #[test]
    fn metadata_is_flat_with_no_back_link() {
        let s = summary(vec![block(true, vec![])]);
        let chunks = chunks_from_summary(&s, "v");
        let doc = chunks[0].to_metadata();
        assert_eq!(doc["video_id"], "v");
        assert_eq!(doc["source_type"], "summary_block");
        // The metadata never embeds the parent summary
        assert!(doc.get("summary").is_none());
        assert!(doc.get("time_blocks").is_none());
        assert_eq!(doc["metadata"]["audio_segment_count"], 1);
    }

    #[test]
    fn long_texts_are_truncated() {
        let mut b = block(false, vec![]);
        b.transcript_summary = Some("x".repeat(5000));
        let s = summary(vec![b]);
        let chunks = chunks_from_summary(&s, "v");
        assert_eq!(chunks[0].text.len(), MAX_CHUNK_CHARS);
        assert!(chunks[0].text.ends_with("..."));
    }

    #[test]
    fn speakers_come_from_segments_and_participants() {
        let s = summary(vec![block(true, vec![])]);
        let chunks = chunks_from_summary(&s, "v");
        assert_eq!(chunks[0].speakers, vec!["Speaker_01".to_string()]);
    }
}
