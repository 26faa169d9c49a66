use async_trait::async_trait;

use crate::IndexResult;

/// Batched text embedding. The provider-specific client lives with the
/// executor; indexing only needs this seam.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a batch of texts. Returns one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>>;
}

/// Embed `texts` in batches of `batch_size`, concatenating the results.
pub async fn embed_in_batches(
    model: &dyn EmbeddingModel,
    texts: &[String],
    batch_size: usize,
) -> IndexResult<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size) {
        let mut batch_vectors = model.embed(batch).await?;
        vectors.append(&mut batch_vectors);
    }
    Ok(vectors)
}
