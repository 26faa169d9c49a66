use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    PointsIdsList, QueryPointsBuilder, ScrollPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use crate::vector_store::{ChunkFilter, ScoredChunk, VectorStore};
use crate::{IndexError, IndexResult};

/// Qdrant-backed vector store.
///
/// Qdrant point ids must be UUIDs or integers, so each point id is a UUID
/// derived from the chunk-id digest; the string `chunk_id` and the full
/// metadata document ride in the payload, with `video_id` and `source_type`
/// kept as flat payload fields for filtering.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
}

impl QdrantVectorStore {
    pub fn new(client: Qdrant, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    pub fn connect(
        url: &str,
        api_key: Option<String>,
        collection: impl Into<String>,
    ) -> IndexResult<Self> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .map_err(IndexError::vector_store)?;
        Ok(Self::new(client, collection))
    }

    /// Create the collection if it does not exist yet.
    pub async fn ensure_collection(&self, dimension: u64) -> IndexResult<()> {
        let exists = self
            .client
            .collection_exists(self.collection.as_str())
            .await
            .map_err(IndexError::vector_store)?;
        if !exists {
            info!(collection = %self.collection, dimension, "creating vector collection");
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(self.collection.as_str())
                        .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine)),
                )
                .await
                .map_err(IndexError::vector_store)?;
        }
        Ok(())
    }

    fn point_id(chunk_id: &str) -> String {
        let digest = Sha256::digest(chunk_id.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes).to_string()
    }

    fn to_filter(filter: &ChunkFilter) -> Filter {
        let mut conditions = Vec::new();
        if let Some(video_id) = &filter.video_id {
            conditions.push(Condition::matches("video_id", video_id.clone()));
        }
        if let Some(kind) = &filter.source_kind {
            conditions.push(Condition::matches("source_type", kind.clone()));
        }
        Filter::must(conditions)
    }

    fn payload_for(metadata: &serde_json::Value, chunk_id: &str) -> IndexResult<Payload> {
        let document = serde_json::to_string(metadata)?;
        let value = json!({
            "chunk_id": chunk_id,
            "video_id": metadata.get("video_id").cloned().unwrap_or(json!("")),
            "source_type": metadata.get("source_type").cloned().unwrap_or(json!("")),
            "document": document,
        });
        Payload::try_from(value).map_err(IndexError::vector_store)
    }

    fn payload_field(
        payload: &std::collections::HashMap<String, qdrant_client::qdrant::Value>,
        key: &str,
    ) -> Option<String> {
        payload.get(key).and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
    }

    fn metadata_from_payload(
        payload: &std::collections::HashMap<String, qdrant_client::qdrant::Value>,
    ) -> serde_json::Value {
        Self::payload_field(payload, "document")
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null)
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
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
        if ids.is_empty() {
            return Ok(());
        }

        let mut points = Vec::with_capacity(ids.len());
        for ((id, vector), metadata) in ids.iter().zip(vectors).zip(&metadatas) {
            points.push(PointStruct::new(
                Self::point_id(id),
                vector,
                Self::payload_for(metadata, id)?,
            ));
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.as_str(), points).wait(true))
            .await
            .map_err(IndexError::vector_store)?;
        debug!(count = ids.len(), collection = %self.collection, "upserted chunks");
        Ok(())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: Option<ChunkFilter>,
    ) -> IndexResult<Vec<ScoredChunk>> {
        let mut request = QueryPointsBuilder::new(self.collection.as_str())
            .query(vector)
            .limit(top_k as u64)
            .with_payload(true);
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            request = request.filter(Self::to_filter(&filter));
        }

        let response = self
            .client
            .query(request)
            .await
            .map_err(IndexError::vector_store)?;

        Ok(response
            .result
            .into_iter()
            .map(|point| ScoredChunk {
                id: Self::payload_field(&point.payload, "chunk_id").unwrap_or_default(),
                score: point.score,
                metadata: Self::metadata_from_payload(&point.payload),
            })
            .collect())
    }

    async fn delete(&self, ids: Vec<String>) -> IndexResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids = ids
            .iter()
            .map(|id| Self::point_id(id).into())
            .collect::<Vec<_>>();
        self.client
            .delete_points(
                DeletePointsBuilder::new(self.collection.as_str())
                    .points(PointsIdsList { ids: point_ids })
                    .wait(true),
            )
            .await
            .map_err(IndexError::vector_store)?;
        Ok(())
    }

    async fn delete_by_filter(&self, filter: ChunkFilter) -> IndexResult<()> {
        if filter.is_empty() {
            return Ok(());
        }
        self.client
            .delete_points(
                DeletePointsBuilder::new(self.collection.as_str())
                    .points(Self::to_filter(&filter))
                    .wait(true),
            )
            .await
            .map_err(IndexError::vector_store)?;
        info!(collection = %self.collection, "deleted chunks by filter");
        Ok(())
    }

    async fn list_chunks(
        &self,
        video_id: &str,
        limit: usize,
    ) -> IndexResult<Vec<serde_json::Value>> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(self.collection.as_str())
                    .filter(Self::to_filter(&ChunkFilter::for_video(video_id)))
                    .limit(limit as u32)
                    .with_payload(true),
            )
            .await
            .map_err(IndexError::vector_store)?;

        Ok(response
            .result
            .iter()
            .map(|point| Self::metadata_from_payload(&point.payload))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_deterministic_uuids() {
        let a = QdrantVectorStore::point_id("chunk_abc");
        let b = QdrantVectorStore::point_id("chunk_abc");
        let c = QdrantVectorStore::point_id("chunk_def");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(Uuid::parse_str(&a).is_ok());
    }
}
