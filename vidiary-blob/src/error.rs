use thiserror::Error;

/// Result type for object store operations
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during object store operations
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Upload failed for {key}: {reason}")]
    UploadFailed { key: String, reason: String },

    #[error("Upload verification failed for {key}: stored {stored} bytes, expected {expected}")]
    UploadVerificationFailed {
        key: String,
        stored: u64,
        expected: u64,
    },

    #[error("Download failed for {key}: {reason}")]
    DownloadFailed { key: String, reason: String },

    #[error("Presign failed for {key}: {reason}")]
    PresignFailed { key: String, reason: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl BlobError {
    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn upload_failed<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::UploadFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn download_failed<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::DownloadFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn presign_failed<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Self::PresignFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
