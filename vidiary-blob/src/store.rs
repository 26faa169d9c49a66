use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use crate::BlobResult;

/// Multi-part download threshold and part size: 8 MiB
pub const PART_SIZE_BYTES: u64 = 8 * 1024 * 1024;

/// Upper bound on in-flight download parts
pub const MAX_CONCURRENT_PARTS: usize = 16;

/// HTTP method a presigned URL is valid for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresignMethod {
    Get,
    Put,
}

/// Result of a successful upload
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Opaque content tag assigned by the store; compared only for equality
    pub version: Option<String>,
    /// Bytes stored
    pub bytes: u64,
}

/// Metadata about a stored object
#[derive(Debug, Clone, Default)]
pub struct ObjectHead {
    pub bytes: u64,
    /// Opaque content tag; compared only for equality, never parsed
    pub version: Option<String>,
    pub content_type: Option<String>,
    pub user_metadata: BTreeMap<String, String>,
}

/// Core object store operations - must be implemented by all backends.
///
/// `download` must be safe to call concurrently with other downloads; no
/// implementation may hold shared mutable state across calls.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file. Implementations verify that the stored byte
    /// length matches the source and remove the partial object otherwise.
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: Option<&str>,
        user_metadata: Option<&BTreeMap<String, String>>,
    ) -> BlobResult<UploadOutcome>;

    /// Download an object to a local path. Objects above the part threshold
    /// are fetched as concurrent ranged parts. Returns the byte count.
    async fn download(
        &self,
        key: &str,
        local_path: &Path,
        bucket: Option<&str>,
    ) -> BlobResult<u64>;

    /// Fetch object metadata. Not-found is `None`, not an error.
    async fn head(&self, key: &str, bucket: Option<&str>) -> BlobResult<Option<ObjectHead>>;

    /// Generate a time-limited URL. For `Put`, `content_type` is part of the
    /// signature and must match the eventual upload.
    async fn presign(
        &self,
        key: &str,
        method: PresignMethod,
        ttl_seconds: u64,
        content_type: Option<&str>,
    ) -> BlobResult<String>;

    /// Delete an object
    async fn delete(&self, key: &str) -> BlobResult<()>;
}

/// Split `total` bytes into `(offset, length)` parts of at most
/// [`PART_SIZE_BYTES`].
pub(crate) fn part_ranges(total: u64) -> Vec<(u64, u64)> {
    let mut parts = Vec::new();
    let mut offset = 0;
    while offset < total {
        let len = PART_SIZE_BYTES.min(total - offset);
        parts.push((offset, len));
        offset += len;
    }
    parts
}
