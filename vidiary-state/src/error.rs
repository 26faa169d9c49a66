use thiserror::Error;

/// Result type for state store operations
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("Malformed record for {job_id}: {reason}")]
    MalformedRecord { job_id: String, reason: String },

    #[error("State backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StateError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    pub fn job_not_found<S: Into<String>>(job_id: S) -> Self {
        Self::JobNotFound {
            job_id: job_id.into(),
        }
    }

    pub fn malformed<J: Into<String>, R: Into<String>>(job_id: J, reason: R) -> Self {
        Self::MalformedRecord {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }
}
