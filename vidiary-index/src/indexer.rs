use tracing::{debug, info};

use vidiary_core::DailySummary;

use crate::chunking::chunks_from_summary;
use crate::embeddings::{embed_in_batches, EmbeddingModel};
use crate::vector_store::{ChunkFilter, VectorStore};
use crate::IndexResult;

/// Index a summary into the vector store: derive chunks, embed their texts
/// in batches, and upsert with full metadata. Returns the chunk count.
///
/// Stateless by design: re-running with the same summary upserts the same
/// ids and leaves the store unchanged.
pub async fn index_summary(
    summary: &DailySummary,
    video_id: &str,
    store: &dyn VectorStore,
    embedder: &dyn EmbeddingModel,
    batch_size: usize,
) -> IndexResult<usize> {
    let chunks = chunks_from_summary(summary, video_id);
    if chunks.is_empty() {
        debug!(video_id, "summary produced no chunks, nothing to index");
        return Ok(0);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(embedder, &texts, batch_size).await?;

    let metadatas = chunks.iter().map(|c| c.to_metadata()).collect();
    let ids = chunks.iter().map(|c| c.chunk_id.clone()).collect();
    store.upsert(vectors, metadatas, ids).await?;

    info!(video_id, count = chunks.len(), "indexed summary chunks");
    Ok(chunks.len())
}

/// Remove every chunk belonging to a video. Called by the deletion flow
/// alongside the job record delete.
pub async fn delete_video_chunks(store: &dyn VectorStore, video_id: &str) -> IndexResult<()> {
    store
        .delete_by_filter(ChunkFilter::for_video(video_id))
        .await?;
    info!(video_id, "deleted indexed chunks");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;

    use vidiary_core::{AudioSegment, Participant, SourceReliability, TimeBlock};

    use crate::memory::MemoryVectorStore;

    /// Deterministic embedder: one dimension per letter bucket.
    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingModel for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.bytes().map(|b| b as f32).sum::<f32>() / 1000.0])
                .collect())
        }
    }

    fn summary() -> DailySummary {
        DailySummary {
            date: "2026-01-20".to_string(),
            video_source: Some("s3://bucket/uploads/v.mp4".to_string()),
            time_blocks: vec![TimeBlock {
                start_time: "00:00".to_string(),
                end_time: "00:05".to_string(),
                activity: "Planning".to_string(),
                location: None,
                source_reliability: SourceReliability::Medium,
                context_type: None,
                is_meeting: None,
                participants: vec![Participant::new("Speaker_01")],
                transcript_summary: Some("Planned the week.".to_string()),
                per_speaker_summary: BTreeMap::new(),
                visual_summary: None,
                action_items: vec!["Book the room".to_string()],
                audio_segments: vec![AudioSegment {
                    start_time: 2.0,
                    end_time: 8.0,
                    speaker_id: "Speaker_01".to_string(),
                    transcript_text: Some("Let's plan the week.".to_string()),
                }],
                video_frames: vec![],
            }],
            video_metadata: None,
            total_duration: 300.0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn indexes_all_chunks() {
        let store = MemoryVectorStore::new();
        let count = index_summary(&summary(), "bucket/uploads/v.mp4", &store, &StubEmbedder, 2)
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn reindexing_is_idempotent() {
        let store = MemoryVectorStore::new();
        let s = summary();
        index_summary(&s, "v", &store, &StubEmbedder, 8).await.unwrap();
        let first = store.len().await;
        index_summary(&s, "v", &store, &StubEmbedder, 8).await.unwrap();
        assert_eq!(store.len().await, first);
    }

    #[tokio::test]
    async fn delete_video_chunks_clears_only_that_video() {
        let store = MemoryVectorStore::new();
        index_summary(&summary(), "video-a", &store, &StubEmbedder, 8)
            .await
            .unwrap();
        index_summary(&summary(), "video-b", &store, &StubEmbedder, 8)
            .await
            .unwrap();
        assert_eq!(store.len().await, 6);

        delete_video_chunks(&store, "video-a").await.unwrap();
        assert_eq!(store.len().await, 3);
        let remaining = store.list_chunks("video-b", 100).await.unwrap();
        assert_eq!(remaining.len(), 3);
    }
}
