use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage vocabulary.
///
/// `Queued` and `Failed` are job-level markers; the remaining variants form
/// the ordered processing vocabulary used for progress derivation. Stage
/// names serialize in snake_case and are stable across the queue, the state
/// store, and the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Started,
    Download,
    AudioExtraction,
    Diarization,
    Asr,
    SceneDetection,
    Keyframes,
    Sync,
    Summarization,
    Upload,
    Indexing,
    Completed,
    Failed,
}

/// Processing vocabulary in canonical order. `Queued` and `Failed` are not
/// part of the progression.
pub const STAGE_ORDER: [Stage; 12] = [
    Stage::Started,
    Stage::Download,
    Stage::AudioExtraction,
    Stage::Diarization,
    Stage::Asr,
    Stage::SceneDetection,
    Stage::Keyframes,
    Stage::Sync,
    Stage::Summarization,
    Stage::Upload,
    Stage::Indexing,
    Stage::Completed,
];

impl Stage {
    /// Stage name as stored in the state store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Download => "download",
            Self::AudioExtraction => "audio_extraction",
            Self::Diarization => "diarization",
            Self::Asr => "asr",
            Self::SceneDetection => "scene_detection",
            Self::Keyframes => "keyframes",
            Self::Sync => "sync",
            Self::Summarization => "summarization",
            Self::Upload => "upload",
            Self::Indexing => "indexing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a stage name as stored in the state store.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "queued" => Some(Self::Queued),
            "started" => Some(Self::Started),
            "download" => Some(Self::Download),
            "audio_extraction" => Some(Self::AudioExtraction),
            "diarization" => Some(Self::Diarization),
            "asr" => Some(Self::Asr),
            "scene_detection" => Some(Self::SceneDetection),
            "keyframes" => Some(Self::Keyframes),
            "sync" => Some(Self::Sync),
            "summarization" => Some(Self::Summarization),
            "upload" => Some(Self::Upload),
            "indexing" => Some(Self::Indexing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Position in the processing vocabulary, if the stage is part of it.
    pub fn order_index(&self) -> Option<usize> {
        STAGE_ORDER.iter().position(|s| s == self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute progress in `[0, 1]` from the current stage.
///
/// `queued` is 0.0; `completed` and `failed` are terminal at 1.0; any other
/// stage `s` maps to `(index_of(s) + 1) / N` over the processing vocabulary.
pub fn progress(current_stage: Stage, _timings: &StageTimings) -> f64 {
    match current_stage {
        Stage::Queued => 0.0,
        Stage::Completed | Stage::Failed => 1.0,
        other => match other.order_index() {
            Some(i) => (i as f64 + 1.0) / STAGE_ORDER.len() as f64,
            None => 0.5,
        },
    }
}

/// Per-stage wall-clock timings in milliseconds.
///
/// Entries are appended, never rewritten: recording a stage that is already
/// present keeps the larger value, so observed timings only grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageTimings(BTreeMap<Stage, u64>);

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record elapsed milliseconds for a stage.
    pub fn record(&mut self, stage: Stage, elapsed_ms: u64) {
        let entry = self.0.entry(stage).or_insert(0);
        if elapsed_ms > *entry {
            *entry = elapsed_ms;
        }
    }

    /// Merge another timing map into this one, keeping the larger value per
    /// stage. Used to fold branch-task timings back into the main map.
    pub fn merge(&mut self, other: &StageTimings) {
        for (stage, ms) in other.iter() {
            self.record(stage, ms);
        }
    }

    pub fn get(&self, stage: Stage) -> Option<u64> {
        self.0.get(&stage).copied()
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0.contains_key(&stage)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, u64)> + '_ {
        self.0.iter().map(|(s, ms)| (*s, *ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_endpoints() {
        let t = StageTimings::new();
        assert_eq!(progress(Stage::Queued, &t), 0.0);
        assert_eq!(progress(Stage::Completed, &t), 1.0);
        assert_eq!(progress(Stage::Failed, &t), 1.0);
    }

    #[test]
    fn progress_is_monotone_over_stage_order() {
        let t = StageTimings::new();
        let mut last = 0.0;
        for stage in STAGE_ORDER {
            let p = progress(stage, &t);
            assert!(p > last, "{stage} did not advance progress");
            assert!(p <= 1.0);
            last = p;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn progress_matches_index_rule() {
        let t = StageTimings::new();
        assert_eq!(progress(Stage::Started, &t), 1.0 / 12.0);
        assert_eq!(progress(Stage::Asr, &t), 5.0 / 12.0);
        assert_eq!(progress(Stage::Indexing, &t), 11.0 / 12.0);
    }

    #[test]
    fn timings_grow_monotonically() {
        let mut t = StageTimings::new();
        t.record(Stage::Download, 1200);
        t.record(Stage::Download, 800);
        assert_eq!(t.get(Stage::Download), Some(1200));
        t.record(Stage::Download, 1500);
        assert_eq!(t.get(Stage::Download), Some(1500));
    }

    #[test]
    fn timings_merge_keeps_larger() {
        let mut a = StageTimings::new();
        a.record(Stage::Diarization, 5000);
        let mut b = StageTimings::new();
        b.record(Stage::Diarization, 4000);
        b.record(Stage::Asr, 9000);
        a.merge(&b);
        assert_eq!(a.get(Stage::Diarization), Some(5000));
        assert_eq!(a.get(Stage::Asr), Some(9000));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in STAGE_ORDER {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("queued"), Some(Stage::Queued));
        assert_eq!(Stage::parse("no_such_stage"), None);
    }

    #[test]
    fn timings_serialize_as_name_keyed_map() {
        let mut t = StageTimings::new();
        t.record(Stage::AudioExtraction, 42);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, r#"{"audio_extraction":42}"#);
        let back: StageTimings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
