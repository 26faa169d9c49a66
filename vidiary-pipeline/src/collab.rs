use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use vidiary_core::AudioSegment;

use crate::{PipelineError, PipelineResult};

/// A diarized span of speech, before transcription is attached.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeakerSpan {
    pub start: f64,
    pub end: f64,
    pub speaker_id: String,
}

/// Diarizer output arrives in one of two shapes depending on the serving
/// stack: the annotation directly, or the annotation wrapped in an output
/// envelope. Both are modeled explicitly; anything else is a named error,
/// not a guess.
#[derive(Debug, Clone)]
pub enum DiarizerOutput {
    Annotated(Vec<SpeakerSpan>),
    Wrapped { inner: Vec<SpeakerSpan> },
}

impl DiarizerOutput {
    pub fn into_spans(self) -> Vec<SpeakerSpan> {
        match self {
            Self::Annotated(spans) => spans,
            Self::Wrapped { inner } => inner,
        }
    }
}

/// Speaker diarization: who spoke when. Output shape is unwrapped by the
/// caller via [`DiarizerOutput::into_spans`].
#[async_trait]
pub trait SpeakerDiarizer: Send + Sync {
    async fn diarize(&self, audio_path: &Path) -> PipelineResult<DiarizerOutput>;
}

/// A transcribed span of speech, before speaker attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscribedSpan {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Speech recognition over a local audio file.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(
        &self,
        audio_path: &Path,
        language: Option<&str>,
    ) -> PipelineResult<Vec<TranscribedSpan>>;
}

/// Language model seam. Rate-limit failures surface as
/// [`PipelineError::RateLimited`] so the retry loop can distinguish them.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn summarize(&self, system_prompt: &str, user_prompt: &str) -> PipelineResult<String>;
}

/// Normalize raw diarizer labels (`SPEAKER_00`, `spk1`, ...) to the
/// `Speaker_NN` form used in prompts and summaries. Numbering starts at 01.
pub fn normalize_speaker_label(raw: &str) -> String {
    let digits: String = raw
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    match digits.parse::<u32>() {
        Ok(n) => format!("Speaker_{:02}", n + 1),
        Err(_) => format!("Speaker_{}", raw),
    }
}

/// Attach speakers to transcribed spans by maximum overlap. Spans with no
/// overlapping speaker keep the nearest span's speaker, falling back to the
/// first label when diarization is sparse.
pub fn merge_transcript_with_speakers(
    transcribed: &[TranscribedSpan],
    speakers: &[SpeakerSpan],
) -> Vec<AudioSegment> {
    transcribed
        .iter()
        .map(|span| {
            let speaker = speakers
                .iter()
                .map(|s| {
                    let overlap = (span.end.min(s.end) - span.start.max(s.start)).max(0.0);
                    (overlap, s)
                })
                .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(overlap, s)| {
                    if overlap > 0.0 {
                        s.speaker_id.clone()
                    } else {
                        nearest_speaker(span, speakers)
                    }
                })
                .unwrap_or_else(|| "Speaker_01".to_string());

            AudioSegment {
                start_time: span.start,
                end_time: span.end,
                speaker_id: normalize_speaker_label(&speaker),
                transcript_text: Some(span.text.clone()),
            }
        })
        .collect()
}

fn nearest_speaker(span: &TranscribedSpan, speakers: &[SpeakerSpan]) -> String {
    speakers
        .iter()
        .min_by(|a, b| {
            let da = distance(span, a);
            let db = distance(span, b);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|s| s.speaker_id.clone())
        .unwrap_or_else(|| "Speaker_01".to_string())
}

fn distance(span: &TranscribedSpan, speaker: &SpeakerSpan) -> f64 {
    if span.end < speaker.start {
        speaker.start - span.end
    } else {
        span.start - speaker.end
    }
}

#[derive(Deserialize)]
struct DiarizerResponse {
    segments: Option<Vec<SpeakerSpan>>,
    output: Option<DiarizerResponseInner>,
}

#[derive(Deserialize)]
struct DiarizerResponseInner {
    segments: Option<Vec<SpeakerSpan>>,
}

/// Diarization over an HTTP inference endpoint: POST the WAV bytes, parse
/// one of the two known response shapes.
pub struct HttpDiarizer {
    http: reqwest::Client,
    url: String,
}

impl HttpDiarizer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    fn parse_response(body: &str) -> PipelineResult<DiarizerOutput> {
        let response: DiarizerResponse = serde_json::from_str(body)
            .map_err(|e| PipelineError::diarizer_shape(format!("not a JSON object: {e}")))?;

        if let Some(segments) = response.segments {
            return Ok(DiarizerOutput::Annotated(segments));
        }
        if let Some(inner) = response.output.and_then(|o| o.segments) {
            return Ok(DiarizerOutput::Wrapped { inner });
        }
        Err(PipelineError::diarizer_shape(
            "neither `segments` nor `output.segments` present",
        ))
    }
}

#[async_trait]
impl SpeakerDiarizer for HttpDiarizer {
    async fn diarize(&self, audio_path: &Path) -> PipelineResult<DiarizerOutput> {
        let audio = tokio::fs::read(audio_path).await?;
        debug!(url = %self.url, bytes = audio.len(), "requesting diarization");

        let response = self
            .http
            .post(&self.url)
            .header("content-type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|e| PipelineError::media(format!("diarizer request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::media(format!("diarizer response unreadable: {e}")))?;
        if !status.is_success() {
            return Err(PipelineError::media(format!(
                "diarizer returned {status}: {body}"
            )));
        }

        Self::parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speaker_labels_normalize() {
        assert_eq!(normalize_speaker_label("SPEAKER_00"), "Speaker_01");
        assert_eq!(normalize_speaker_label("SPEAKER_01"), "Speaker_02");
        assert_eq!(normalize_speaker_label("spk3"), "Speaker_04");
        assert_eq!(normalize_speaker_label("alice"), "Speaker_alice");
    }

    #[test]
    fn merge_assigns_speaker_by_max_overlap() {
        let transcribed = vec![TranscribedSpan {
            start: 0.0,
            end: 10.0,
            text: "hello there".to_string(),
        }];
        let speakers = vec![
            SpeakerSpan {
                start: 0.0,
                end: 3.0,
                speaker_id: "SPEAKER_00".to_string(),
            },
            SpeakerSpan {
                start: 3.0,
                end: 10.0,
                speaker_id: "SPEAKER_01".to_string(),
            },
        ];
        let segments = merge_transcript_with_speakers(&transcribed, &speakers);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker_id, "Speaker_02");
        assert_eq!(segments[0].transcript_text.as_deref(), Some("hello there"));
    }

    #[test]
    fn merge_uses_nearest_speaker_when_no_overlap() {
        let transcribed = vec![TranscribedSpan {
            start: 20.0,
            end: 25.0,
            text: "later words".to_string(),
        }];
        let speakers = vec![
            SpeakerSpan {
                start: 0.0,
                end: 5.0,
                speaker_id: "SPEAKER_00".to_string(),
            },
            SpeakerSpan {
                start: 14.0,
                end: 18.0,
                speaker_id: "SPEAKER_01".to_string(),
            },
        ];
        let segments = merge_transcript_with_speakers(&transcribed, &speakers);
        assert_eq!(segments[0].speaker_id, "Speaker_02");
    }

    #[test]
    fn diarizer_parses_annotated_shape() {
        let body = r#"{"segments":[{"start":0.0,"end":4.5,"speaker_id":"SPEAKER_00"}]}"#;
        let output = HttpDiarizer::parse_response(body).unwrap();
        let spans = output.into_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].speaker_id, "SPEAKER_00");
    }

    #[test]
    fn diarizer_parses_wrapped_shape() {
        let body =
            r#"{"output":{"segments":[{"start":1.0,"end":2.0,"speaker_id":"SPEAKER_01"}]}}"#;
        let output = HttpDiarizer::parse_response(body).unwrap();
        assert!(matches!(output, DiarizerOutput::Wrapped { .. }));
        assert_eq!(output.into_spans().len(), 1);
    }

    #[test]
    fn diarizer_rejects_unknown_shapes() {
        let err = HttpDiarizer::parse_response(r#"{"annotation": []}"#).unwrap_err();
        assert!(matches!(err, PipelineError::DiarizerShape { .. }));
    }
}
