//! # vidiary-index: summaries into searchable chunks
//!
//! A completed job's `DailySummary` is broken into deterministic chunks
//! (one summary chunk per time block, one transcript chunk per block with
//! audio, one chunk per action item), embedded in batches, and upserted into
//! the vector store with flat, denormalized metadata. Deleting a video
//! deletes every chunk carrying its `video_id`.
//!
//! Chunk ids are content-addressed: re-parsing and re-indexing the same
//! summary yields exactly the same ids, so re-indexing is idempotent.

mod chunking;
mod embeddings;
mod error;
mod indexer;
pub mod memory;
mod qdrant;
mod vector_store;

pub use chunking::{chunks_from_summary, Chunk, SourceKind, MAX_CHUNK_CHARS};
pub use embeddings::{embed_in_batches, EmbeddingModel};
pub use error::{IndexError, IndexResult};
pub use indexer::{delete_video_chunks, index_summary};
pub use memory::MemoryVectorStore;
pub use qdrant::QdrantVectorStore;
pub use vector_store::{ChunkFilter, ScoredChunk, VectorStore};
