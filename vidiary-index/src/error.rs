use thiserror::Error;

/// Result type for indexing operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur while indexing chunks
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Embedding failed: {reason}")]
    Embedding { reason: String },

    #[error("Vector store error: {source}")]
    VectorStore {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("Dimension mismatch: {vectors} vectors for {ids} ids")]
    DimensionMismatch { vectors: usize, ids: usize },
}

impl IndexError {
    pub fn embedding<S: Into<String>>(reason: S) -> Self {
        Self::Embedding {
            reason: reason.into(),
        }
    }

    /// Create a vector store error from any error type
    pub fn vector_store<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::VectorStore {
            source: Box::new(error),
        }
    }
}
