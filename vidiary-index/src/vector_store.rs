use async_trait::async_trait;

use crate::IndexResult;

/// A similarity search hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub id: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

/// Metadata filter for queries and bulk deletes.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub video_id: Option<String>,
    pub source_kind: Option<String>,
}

impl ChunkFilter {
    pub fn for_video(video_id: impl Into<String>) -> Self {
        Self {
            video_id: Some(video_id.into()),
            source_kind: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.video_id.is_none() && self.source_kind.is_none()
    }

    /// True if a metadata document passes this filter.
    pub fn matches(&self, metadata: &serde_json::Value) -> bool {
        if let Some(video_id) = &self.video_id {
            if metadata.get("video_id").and_then(|v| v.as_str()) != Some(video_id) {
                return false;
            }
        }
        if let Some(kind) = &self.source_kind {
            if metadata.get("source_type").and_then(|v| v.as_str()) != Some(kind.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Narrow vector store seam used by the indexing stage and the deletion flow.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace vectors with their metadata, keyed by chunk id.
    async fn upsert(
        &self,
        vectors: Vec<Vec<f32>>,
        metadatas: Vec<serde_json::Value>,
        ids: Vec<String>,
    ) -> IndexResult<()>;

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<ChunkFilter>,
    ) -> IndexResult<Vec<ScoredChunk>>;

    async fn delete(&self, ids: Vec<String>) -> IndexResult<()>;

    async fn delete_by_filter(&self, filter: ChunkFilter) -> IndexResult<()>;

    /// Metadata documents for chunks matching a video id, up to `limit`.
    async fn list_chunks(
        &self,
        video_id: &str,
        limit: usize,
    ) -> IndexResult<Vec<serde_json::Value>>;
}
