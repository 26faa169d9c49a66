//! # vidiary-pipeline: the per-job executor
//!
//! One executor task processes one video end to end:
//!
//! ```text
//! started → download → audio_extraction → diarization → asr ─┐
//!                    └→ scene_detection → keyframes ─────────┴→ sync
//!                                    → summarization → upload → indexing → completed
//! ```
//!
//! The audio and scene branches run concurrently and join before `sync`.
//! With streaming intake enabled, audio extraction decodes straight from a
//! presigned URL while the full object downloads in the background, so
//! transfer and decode overlap instead of stacking.
//!
//! Every stage records its wall-clock into the job's timings (success or
//! failure) and reports progress to the job state store. Mandatory stage
//! failures reach one outer handler that uploads a failure report and writes
//! the terminal `failed` state; `indexing` alone is best-effort.

pub mod collab;
mod error;
mod executor;
pub mod media;
mod openai;
mod retry;
pub mod scene;
mod summarize;
mod sync;
mod timing;

pub use collab::{
    DiarizerOutput, HttpDiarizer, LanguageModel, SpeakerDiarizer, SpeakerSpan, SpeechRecognizer,
    TranscribedSpan,
};
pub use error::{PipelineError, PipelineResult};
pub use executor::{Executor, JobSpec};
pub use media::{FfmpegMedia, MediaProcessor};
pub use openai::OpenAiClient;
pub use retry::{parse_retry_after, retry_delay, with_rate_limit_retry};
pub use scene::{FfmpegSceneDetector, SceneDetector};
pub use summarize::Summarizer;
pub use sync::{synchronize, SyncWindow};
pub use timing::StageClock;
