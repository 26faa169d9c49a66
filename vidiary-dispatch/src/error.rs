use thiserror::Error;

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors that can occur while dispatching queue messages
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Deterministically malformed message; deleted, never retried
    #[error("Malformed queue message: {reason}")]
    MalformedMessage { reason: String },

    /// The referenced object is gone; redelivery and the DLQ take over
    #[error("Object not found for dispatch: {key}")]
    ObjectMissing { key: String },

    #[error("Executor launch failed: {reason}")]
    LaunchFailed { reason: String },

    #[error("Object store error: {0}")]
    Blob(#[from] vidiary_blob::BlobError),

    #[error("State store error: {0}")]
    State(#[from] vidiary_state::StateError),

    #[error("Queue backend error: {source}")]
    Queue {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl DispatchError {
    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    pub fn object_missing<S: Into<String>>(key: S) -> Self {
        Self::ObjectMissing { key: key.into() }
    }

    pub fn launch_failed<S: Into<String>>(reason: S) -> Self {
        Self::LaunchFailed {
            reason: reason.into(),
        }
    }

    /// Create a queue backend error from any error type
    pub fn queue<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Queue {
            source: Box::new(error),
        }
    }
}
