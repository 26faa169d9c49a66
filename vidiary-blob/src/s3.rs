use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::Client;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::store::{
    part_ranges, ObjectHead, ObjectStore, PresignMethod, UploadOutcome, MAX_CONCURRENT_PARTS,
    PART_SIZE_BYTES,
};
use crate::{BlobError, BlobResult};

/// S3-backed object store.
///
/// Cloneable and safe to share across tasks; the inner client is
/// connection-pooled and all operations are stateless.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Construct a client from the ambient AWS environment.
    pub async fn from_env(region: &str, bucket: impl Into<String>) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config), bucket)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// ETags arrive quoted; store and compare them bare.
    fn normalize_version(etag: Option<String>) -> Option<String> {
        etag.map(|e| e.trim_matches('"').to_string())
            .filter(|e| !e.is_empty())
    }

    async fn head_in(&self, bucket: &str, key: &str) -> BlobResult<Option<ObjectHead>> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => {
                let user_metadata = out
                    .metadata()
                    .map(|m| {
                        m.iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect::<BTreeMap<_, _>>()
                    })
                    .unwrap_or_default();
                Ok(Some(ObjectHead {
                    bytes: out.content_length().unwrap_or(0) as u64,
                    version: Self::normalize_version(out.e_tag().map(String::from)),
                    content_type: out.content_type().map(String::from),
                    user_metadata,
                }))
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    return Ok(None);
                }
                Err(BlobError::backend(err))
            }
        }
    }

    async fn download_single(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> BlobResult<u64> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::download_failed(key, e.to_string()))?;
        let data: bytes::Bytes = out
            .body
            .collect()
            .await
            .map_err(|e| BlobError::download_failed(key, e.to_string()))?
            .into_bytes();
        let mut file = tokio::fs::File::create(local_path).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(data.len() as u64)
    }

    async fn download_ranged(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        total: u64,
    ) -> BlobResult<u64> {
        let ranges = part_ranges(total);
        debug!(
            key,
            total,
            parts = ranges.len(),
            "starting ranged download"
        );

        let parts = stream::iter(ranges.into_iter().map(|(offset, len)| {
            let client = self.client.clone();
            let bucket = bucket.to_string();
            let key = key.to_string();
            async move {
                let range = format!("bytes={}-{}", offset, offset + len - 1);
                let out = client
                    .get_object()
                    .bucket(&bucket)
                    .key(&key)
                    .range(range)
                    .send()
                    .await
                    .map_err(|e| BlobError::download_failed(&key, e.to_string()))?;
                let data: bytes::Bytes = out
                    .body
                    .collect()
                    .await
                    .map_err(|e| BlobError::download_failed(&key, e.to_string()))?
                    .into_bytes();
                Ok::<_, BlobError>(data)
            }
        }))
        // buffered() keeps up to MAX_CONCURRENT_PARTS requests in flight and
        // yields completed parts in order, so the file is written sequentially
        .buffered(MAX_CONCURRENT_PARTS);

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut written: u64 = 0;
        let mut parts = Box::pin(parts);
        while let Some(part) = parts.try_next().await? {
            file.write_all(&part).await?;
            written += part.len() as u64;
        }
        file.flush().await?;

        if written != total {
            return Err(BlobError::download_failed(
                key,
                format!("wrote {} of {} bytes", written, total),
            ));
        }
        Ok(written)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: Option<&str>,
        user_metadata: Option<&BTreeMap<String, String>>,
    ) -> BlobResult<UploadOutcome> {
        let expected = tokio::fs::metadata(local_path).await?.len();
        info!(key, bytes = expected, "uploading object");

        let body = AwsByteStream::from_path(local_path)
            .await
            .map_err(|e| BlobError::upload_failed(key, e.to_string()))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body);
        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }
        if let Some(metadata) = user_metadata {
            for (k, v) in metadata {
                request = request.metadata(k, v);
            }
        }

        request
            .send()
            .await
            .map_err(|e| BlobError::upload_failed(key, e.to_string()))?;

        // Verify the stored byte count before declaring success; a short
        // object is worse than a failed upload.
        let head = self
            .head_in(&self.bucket, key)
            .await?
            .ok_or_else(|| BlobError::upload_failed(key, "object missing after upload"))?;
        if head.bytes != expected {
            warn!(
                key,
                stored = head.bytes,
                expected,
                "upload verification failed, removing partial object"
            );
            self.delete(key).await.ok();
            return Err(BlobError::UploadVerificationFailed {
                key: key.to_string(),
                stored: head.bytes,
                expected,
            });
        }

        Ok(UploadOutcome {
            version: head.version,
            bytes: head.bytes,
        })
    }

    async fn download(
        &self,
        key: &str,
        local_path: &Path,
        bucket: Option<&str>,
    ) -> BlobResult<u64> {
        let bucket = bucket.unwrap_or(&self.bucket);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let head = self
            .head_in(bucket, key)
            .await?
            .ok_or_else(|| BlobError::not_found(key))?;

        let bytes = if head.bytes > PART_SIZE_BYTES {
            self.download_ranged(bucket, key, local_path, head.bytes)
                .await?
        } else {
            self.download_single(bucket, key, local_path).await?
        };
        info!(key, bytes, "downloaded object");
        Ok(bytes)
    }

    async fn head(&self, key: &str, bucket: Option<&str>) -> BlobResult<Option<ObjectHead>> {
        self.head_in(bucket.unwrap_or(&self.bucket), key).await
    }

    async fn presign(
        &self,
        key: &str,
        method: PresignMethod,
        ttl_seconds: u64,
        content_type: Option<&str>,
    ) -> BlobResult<String> {
        let config = PresigningConfig::expires_in(Duration::from_secs(ttl_seconds))
            .map_err(|e| BlobError::presign_failed(key, e.to_string()))?;

        let uri = match method {
            PresignMethod::Get => self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(config)
                .await
                .map_err(|e| BlobError::presign_failed(key, e.to_string()))?
                .uri()
                .to_string(),
            PresignMethod::Put => {
                let mut request = self.client.put_object().bucket(&self.bucket).key(key);
                if let Some(ct) = content_type {
                    request = request.content_type(ct);
                }
                request
                    .presigned(config)
                    .await
                    .map_err(|e| BlobError::presign_failed(key, e.to_string()))?
                    .uri()
                    .to_string()
            }
        };
        debug!(key, ttl_seconds, "generated presigned url");
        Ok(uri)
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(BlobError::backend)?;
        Ok(())
    }
}
