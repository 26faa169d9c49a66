use thiserror::Error;

use vidiary_core::Stage;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised by pipeline stages and their collaborators
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Media processing failed: {reason}")]
    Media { reason: String },

    /// The input cannot be processed; retrying will not help
    #[error("Bad input: {reason}")]
    BadInput { reason: String },

    #[error("{stage} failed: {reason}")]
    StageFailed { stage: Stage, reason: String },

    /// Provider rate limit; the retry loop sleeps and tries again
    #[error("Language model rate limited: {message}")]
    RateLimited { message: String },

    #[error("Language model call failed: {reason}")]
    Llm { reason: String },

    #[error("Diarizer returned an unrecognized output shape: {reason}")]
    DiarizerShape { reason: String },

    #[error("Branch task panicked: {reason}")]
    BranchPanic { reason: String },

    #[error("Object store error: {0}")]
    Blob(#[from] vidiary_blob::BlobError),

    #[error("State store error: {0}")]
    State(#[from] vidiary_state::StateError),

    #[error("Indexing error: {0}")]
    Index(#[from] vidiary_index::IndexError),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub fn media<S: Into<String>>(reason: S) -> Self {
        Self::Media {
            reason: reason.into(),
        }
    }

    pub fn bad_input<S: Into<String>>(reason: S) -> Self {
        Self::BadInput {
            reason: reason.into(),
        }
    }

    pub fn stage_failed<S: Into<String>>(stage: Stage, reason: S) -> Self {
        Self::StageFailed {
            stage,
            reason: reason.into(),
        }
    }

    pub fn rate_limited<S: Into<String>>(message: S) -> Self {
        Self::RateLimited {
            message: message.into(),
        }
    }

    pub fn llm<S: Into<String>>(reason: S) -> Self {
        Self::Llm {
            reason: reason.into(),
        }
    }

    pub fn diarizer_shape<S: Into<String>>(reason: S) -> Self {
        Self::DiarizerShape {
            reason: reason.into(),
        }
    }

    /// True for provider rate-limit failures the retry loop should absorb.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Llm { reason } => {
                let lower = reason.to_lowercase();
                reason.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit")
            }
            _ => false,
        }
    }

    /// Walk the source chain into a readable trace for the failure report.
    pub fn trace(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str(&format!("\ncaused by: {err}"));
            source = err.source();
        }
        out
    }
}
