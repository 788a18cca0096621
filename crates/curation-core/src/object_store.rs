//! Object Store Gateway. Wraps the `object_store` crate behind a small
//! async trait so the rest of the crate never imports `object_store`
//! directly, the same way external SDKs get wrapped behind a narrow seam
//! elsewhere in this codebase.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use ::object_store::aws::AmazonS3Builder;
use ::object_store::path::Path as StorePath;
use ::object_store::{ObjectStore as _, PutPayload};
use thiserror::Error;
use tracing::{instrument, warn};

/// Errors raised by the Object Store Gateway.
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("object not found at key {0}")]
    NotFound(String),

    #[error("refused to operate outside the managed prefix: {0}")]
    PrefixGuard(String),

    #[error("backend error for key {key}: {source}")]
    Backend {
        key: String,
        #[source]
        source: ::object_store::Error,
    },

    #[error("failed to build presigned URL for key {0}: not supported by this backend")]
    PresignUnsupported(String),
}

/// The prefixes this crate is allowed to write under. `sessions/` holds the
/// raw-upload staging tree managed by the upload API (out of scope here);
/// the rest are artifact trees written by the per-file and batch pipelines.
pub const PREFIX_SESSIONS: &str = "sessions/";
pub const PREFIX_PROCESSED: &str = "processed/";
pub const PREFIX_COMPRESSED: &str = "compressed/";
pub const PREFIX_THUMBNAILS: &str = "thumbnails/";

const WRITABLE_PREFIXES: &[&str] = &[
    PREFIX_SESSIONS,
    PREFIX_PROCESSED,
    PREFIX_COMPRESSED,
    PREFIX_THUMBNAILS,
];

/// Prefixes a `delete` call may target. Only the raw-upload staging tree is
/// ever deleted by this crate; processed/compressed/thumbnail artifacts are
/// retained once written, so a delete reaching one of those prefixes is a
/// caller bug, not routine cleanup.
const DELETABLE_PREFIXES: &[&str] = &[PREFIX_SESSIONS];

/// The storage seam. A trait so tests and the worker binary can swap in an
/// in-memory backend without touching pipeline code.
#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, ObjectStoreError>;
}

/// S3-backed implementation. `bucket`/`region`/credentials are taken from
/// the standard `AWS_*` environment variables the `object_store` crate
/// already knows how to read, so no bespoke config plumbing is needed here.
pub struct S3ObjectStoreGateway {
    store: Arc<dyn ::object_store::ObjectStore>,
    bucket: String,
}

impl S3ObjectStoreGateway {
    pub fn from_env(bucket: impl Into<String>) -> Result<Self, ObjectStoreError> {
        let bucket = bucket.into();
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(&bucket)
            .build()
            .map_err(|source| ObjectStoreError::Backend {
                key: String::new(),
                source,
            })?;
        Ok(Self {
            store: Arc::new(store),
            bucket,
        })
    }
}

fn guard_write_prefix(key: &str) -> Result<StorePath, ObjectStoreError> {
    if !WRITABLE_PREFIXES.iter().any(|p| key.starts_with(p)) {
        return Err(ObjectStoreError::PrefixGuard(key.to_string()));
    }
    Ok(StorePath::from(key))
}

/// Deletes are scoped more narrowly than writes: only keys under
/// `sessions/` may ever be deleted (see [`DELETABLE_PREFIXES`]).
fn guard_delete_prefix(key: &str) -> Result<StorePath, ObjectStoreError> {
    if !DELETABLE_PREFIXES.iter().any(|p| key.starts_with(p)) {
        return Err(ObjectStoreError::PrefixGuard(key.to_string()));
    }
    Ok(StorePath::from(key))
}

#[async_trait]
impl ObjectStoreGateway for S3ObjectStoreGateway {
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, key), err)]
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), ObjectStoreError> {
        let path = guard_write_prefix(key)?;
        self.store
            .put(&path, PutPayload::from_bytes(bytes))
            .await
            .map_err(|source| ObjectStoreError::Backend {
                key: key.to_string(),
                source,
            })?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, key), err)]
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = StorePath::from(key);
        let result = self.store.get(&path).await.map_err(|source| match source {
            ::object_store::Error::NotFound { .. } => ObjectStoreError::NotFound(key.to_string()),
            source => ObjectStoreError::Backend {
                key: key.to_string(),
                source,
            },
        })?;
        let bytes = result
            .bytes()
            .await
            .map_err(|source| ObjectStoreError::Backend {
                key: key.to_string(),
                source,
            })?;
        Ok(bytes)
    }

    /// Restricted to `sessions/`: a cleanup bug can never reach a retained
    /// artifact tree, even if passed a `processed/`/`compressed/`/
    /// `thumbnails/` key by mistake.
    #[instrument(skip(self), fields(bucket = %self.bucket, key), err)]
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = guard_delete_prefix(key)?;
        match self.store.delete(&path).await {
            Ok(()) => Ok(()),
            Err(::object_store::Error::NotFound { .. }) => Ok(()),
            Err(source) => Err(ObjectStoreError::Backend {
                key: key.to_string(),
                source,
            }),
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, prefix), err)]
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let path = StorePath::from(prefix);
        let mut stream = self.store.list(Some(&path));
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|source| ObjectStoreError::Backend {
                key: prefix.to_string(),
                source,
            })?;
            keys.push(meta.location.to_string());
        }
        Ok(keys)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, key), err)]
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, ObjectStoreError> {
        let path = StorePath::from(key);
        self.store
            .signed_url(::object_store::SignOptions::default(), &path, ttl)
            .await
            .map(|url| url.to_string())
            .map_err(|source| {
                warn!(%key, "backend does not support presigned URLs, falling back");
                ObjectStoreError::Backend {
                    key: key.to_string(),
                    source,
                }
            })
    }
}

/// Best-effort cleanup of the raw-upload object once all downstream
/// artifacts have been written: failures here are logged, never propagated
/// as job-fatal, since the raw upload already served its purpose.
pub async fn best_effort_delete_raw_upload(store: &dyn ObjectStoreGateway, key: &str) {
    if let Err(err) = store.delete(key).await {
        warn!(%key, error = %err, "failed to delete raw upload, leaving for later cleanup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_guard_rejects_keys_outside_writable_prefixes() {
        assert!(guard_write_prefix("sessions/abc/raw/1.jpg").is_ok());
        assert!(guard_write_prefix("processed/abc/1.webm").is_ok());
        assert!(guard_write_prefix("../etc/passwd").is_err());
        assert!(guard_write_prefix("unrelated/1.jpg").is_err());
    }

    #[test]
    fn delete_guard_only_allows_session_uploads() {
        assert!(guard_delete_prefix("sessions/abc/raw/1.jpg").is_ok());
        assert!(guard_delete_prefix("processed/abc/1.webm").is_err());
        assert!(guard_delete_prefix("compressed/abc/1.webm").is_err());
        assert!(guard_delete_prefix("thumbnails/abc/1.webp").is_err());
    }
}
