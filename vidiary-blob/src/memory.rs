use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{ObjectHead, ObjectStore, PresignMethod, UploadOutcome};
use crate::{BlobError, BlobResult};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: Option<String>,
    user_metadata: BTreeMap<String, String>,
    version: String,
}

/// In-memory object store for tests and local development.
///
/// Versions are derived from content, so re-uploading identical bytes yields
/// an equal version, matching the dedup behavior of a content-tagged store.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Arc<RwLock<HashMap<(String, String), StoredObject>>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn content_version(data: &[u8]) -> String {
        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Seed an object directly, as if a client had uploaded it.
    pub async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: Option<&str>) -> String {
        let version = Self::content_version(&data);
        let mut objects = self.objects.write().await;
        objects.insert(
            (self.bucket.clone(), key.to_string()),
            StoredObject {
                data,
                content_type: content_type.map(String::from),
                user_metadata: BTreeMap::new(),
                version: version.clone(),
            },
        );
        version
    }

    /// Fetch stored bytes for assertions.
    pub async fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.read().await;
        objects
            .get(&(self.bucket.clone(), key.to_string()))
            .map(|o| o.data.clone())
    }

    pub async fn exists(&self, key: &str) -> bool {
        let objects = self.objects.read().await;
        objects.contains_key(&(self.bucket.clone(), key.to_string()))
    }

    pub async fn keys(&self) -> Vec<String> {
        let objects = self.objects.read().await;
        let mut keys: Vec<String> = objects.keys().map(|(_, k)| k.clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: Option<&str>,
        user_metadata: Option<&BTreeMap<String, String>>,
    ) -> BlobResult<UploadOutcome> {
        let data = tokio::fs::read(local_path).await?;
        let bytes = data.len() as u64;
        let version = Self::content_version(&data);
        let mut objects = self.objects.write().await;
        objects.insert(
            (self.bucket.clone(), key.to_string()),
            StoredObject {
                data,
                content_type: content_type.map(String::from),
                user_metadata: user_metadata.cloned().unwrap_or_default(),
                version: version.clone(),
            },
        );
        Ok(UploadOutcome {
            version: Some(version),
            bytes,
        })
    }

    async fn download(
        &self,
        key: &str,
        local_path: &Path,
        bucket: Option<&str>,
    ) -> BlobResult<u64> {
        let bucket = bucket.unwrap_or(&self.bucket).to_string();
        let data = {
            let objects = self.objects.read().await;
            objects
                .get(&(bucket, key.to_string()))
                .map(|o| o.data.clone())
                .ok_or_else(|| BlobError::not_found(key))?
        };
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &data).await?;
        Ok(data.len() as u64)
    }

    async fn head(&self, key: &str, bucket: Option<&str>) -> BlobResult<Option<ObjectHead>> {
        let bucket = bucket.unwrap_or(&self.bucket).to_string();
        let objects = self.objects.read().await;
        Ok(objects.get(&(bucket, key.to_string())).map(|o| ObjectHead {
            bytes: o.data.len() as u64,
            version: Some(o.version.clone()),
            content_type: o.content_type.clone(),
            user_metadata: o.user_metadata.clone(),
        }))
    }

    async fn presign(
        &self,
        key: &str,
        method: PresignMethod,
        ttl_seconds: u64,
        _content_type: Option<&str>,
    ) -> BlobResult<String> {
        let verb = match method {
            PresignMethod::Get => "get",
            PresignMethod::Put => "put",
        };
        Ok(format!(
            "memory://{}/{}?method={}&ttl={}",
            self.bucket, key, verb, ttl_seconds
        ))
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let mut objects = self.objects.write().await;
        objects.remove(&(self.bucket.clone(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_download_round_trip() {
        let store = MemoryObjectStore::new("test-bucket");
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.bin");
        tokio::fs::write(&src, b"hello world").await.unwrap();

        let outcome = store
            .upload(&src, "uploads/in.bin", Some("video/mp4"), None)
            .await
            .unwrap();
        assert_eq!(outcome.bytes, 11);
        assert!(outcome.version.is_some());

        let dst = dir.path().join("out.bin");
        let bytes = store.download("uploads/in.bin", &dst, None).await.unwrap();
        assert_eq!(bytes, 11);
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn head_returns_none_for_missing_objects() {
        let store = MemoryObjectStore::new("test-bucket");
        assert!(store.head("nope", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn identical_content_yields_identical_version() {
        let store = MemoryObjectStore::new("test-bucket");
        let v1 = store.put_bytes("a", b"same bytes".to_vec(), None).await;
        let v2 = store.put_bytes("b", b"same bytes".to_vec(), None).await;
        let v3 = store.put_bytes("c", b"different".to_vec(), None).await;
        assert_eq!(v1, v2);
        assert_ne!(v1, v3);
    }

    #[tokio::test]
    async fn download_missing_object_fails() {
        let store = MemoryObjectStore::new("test-bucket");
        let dir = tempfile::tempdir().unwrap();
        let err = store
            .download("missing", &dir.path().join("x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_removes_object() {
        let store = MemoryObjectStore::new("test-bucket");
        store.put_bytes("k", b"v".to_vec(), None).await;
        assert!(store.exists("k").await);
        store.delete("k").await.unwrap();
        assert!(!store.exists("k").await);
    }
}
