//! Upload and download wrappers over an [`ObjectStore`].
//!
//! An upload validates the bucket name, creates the bucket if needed, stores
//! the object, registers the bucket with the [`BucketRegistry`] (best-effort)
//! and announces an [`UploadEvent`] on the bus. Registry failures never fail
//! the upload.

use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bucket::{validate_bucket_name, BucketNameError};
use crate::bus::{EventBus, UploadEvent};
use crate::contract::{BucketRegistry, ObjectStore, StoreError};
use crate::mime;

/// Metadata key holding the classified content type of an upload.
pub const CONTENT_TYPE_KEY: &str = "content-type";

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    InvalidBucket(#[from] BucketNameError),
    #[error("file name must not be empty")]
    EmptyFileName,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A file to upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub bucket: String,
    pub file_name: String,
    pub content: Bytes,
    pub metadata: HashMap<String, String>,
}

impl UploadRequest {
    pub fn new(bucket: &str, file_name: &str, content: impl Into<Bytes>) -> Self {
        Self {
            bucket: bucket.to_owned(),
            file_name: file_name.to_owned(),
            content: content.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_owned(), value.to_owned());
        self
    }
}

/// What an upload did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub bucket: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: usize,
    pub bucket_created: bool,
    /// `true` only when this upload newly registered the bucket.
    pub bucket_registered: bool,
}

pub struct BucketClient {
    store: Arc<dyn ObjectStore>,
    registry: Arc<dyn BucketRegistry>,
    bus: Arc<EventBus>,
    source: Option<String>,
}

impl BucketClient {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<dyn BucketRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            source: None,
        }
    }

    /// Identity attached to published upload events.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, TransferError> {
        let UploadRequest {
            bucket,
            file_name,
            content,
            mut metadata,
        } = request;
        validate_bucket_name(&bucket)?;
        if file_name.trim().is_empty() {
            return Err(TransferError::EmptyFileName);
        }

        let bucket_created = if self.store.bucket_exists(&bucket).await? {
            false
        } else {
            info!(bucket = %bucket, "[UPLOAD] Bucket missing, creating it");
            self.store.make_bucket(&bucket).await?;
            true
        };

        let mime_type = mime::classify(&file_name);
        metadata
            .entry(CONTENT_TYPE_KEY.to_owned())
            .or_insert_with(|| mime_type.clone());
        let size = content.len();
        self.store
            .put_object(&bucket, &file_name, content, metadata.clone())
            .await?;
        info!(bucket = %bucket, file = %file_name, size, mime_type = %mime_type, "[UPLOAD] Object stored");

        let bucket_registered = match self.registry.register_bucket(&bucket).await {
            Ok(registered) => registered,
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "[UPLOAD] Bucket registration failed, continuing");
                false
            }
        };

        let delivered = self.bus.publish_upload(&UploadEvent {
            bucket: bucket.clone(),
            file: file_name.clone(),
            mime_type: mime_type.clone(),
            metadata,
            timestamp: Utc::now(),
            source: self.source.clone(),
        });
        tracing::debug!(delivered, "[UPLOAD] Upload event published");

        Ok(UploadReceipt {
            bucket,
            file_name,
            mime_type,
            size,
            bucket_created,
            bucket_registered,
        })
    }

    pub async fn download(&self, bucket: &str, key: &str) -> Result<Bytes, TransferError> {
        validate_bucket_name(bucket)?;
        let content = self.store.get_object(bucket, key).await?;
        info!(bucket, key, size = content.len(), "[DOWNLOAD] Object fetched");
        Ok(content)
    }

    /// Downloads straight to a local file.
    pub async fn download_to_path(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<(), TransferError> {
        validate_bucket_name(bucket)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::from)?;
        }
        self.store.fetch_object_to_path(bucket, key, path).await?;
        info!(bucket, key, path = %path.display(), "[DOWNLOAD] Object written to disk");
        Ok(())
    }
}
