use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::vector_store::{ChunkFilter, ScoredChunk, VectorStore};
use crate::{IndexError, IndexResult};

/// In-memory vector store with cosine similarity, for tests and local runs.
#[derive(Clone, Default)]
pub struct MemoryVectorStore {
    points: Arc<RwLock<HashMap<String, (Vec<f32>, serde_json::Value)>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }

    pub async fn get(&self, id: &str) -> Option<serde_json::Value> {
        self.points.read().await.get(id).map(|(_, m)| m.clone())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(
        &self,
        vectors: Vec<Vec<f32>>,
        metadatas: Vec<serde_json::Value>,
        ids: Vec<String>,
    ) -> IndexResult<()> {
        if vectors.len() != ids.len() || metadatas.len() != ids.len() {
            return Err(IndexError::DimensionMismatch {
                vectors: vectors.len(),
                ids: ids.len(),
            });
        }
        let mut points = self.points.write().await;
        for ((id, vector), metadata) in ids.into_iter().zip(vectors).zip(metadatas) {
            points.insert(id, (vector, metadata));
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<ChunkFilter>,
    ) -> IndexResult<Vec<ScoredChunk>> {
        let points = self.points.read().await;
        let mut hits: Vec<ScoredChunk> = points
            .iter()
            .filter(|(_, (_, metadata))| {
                filter.as_ref().map(|f| f.matches(metadata)).unwrap_or(true)
            })
            .map(|(id, (stored, metadata))| ScoredChunk {
                id: id.clone(),
                score: cosine(&vector, stored),
                metadata: metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, ids: Vec<String>) -> IndexResult<()> {
        let mut points = self.points.write().await;
        for id in ids {
            points.remove(&id);
        }
        Ok(())
    }

    async fn delete_by_filter(&self, filter: ChunkFilter) -> IndexResult<()> {
        let mut points = self.points.write().await;
        points.retain(|_, (_, metadata)| !filter.matches(metadata));
        Ok(())
    }

    async fn list_chunks(
        &self,
        video_id: &str,
        limit: usize,
    ) -> IndexResult<Vec<serde_json::Value>> {
        let filter = ChunkFilter::for_video(video_id);
        let points = self.points.read().await;
        Ok(points
            .values()
            .filter(|(_, metadata)| filter.matches(metadata))
            .take(limit)
            .map(|(_, metadata)| metadata.clone())
            .collect())
    }
}
