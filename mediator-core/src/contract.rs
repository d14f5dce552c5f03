//! # contract: the seams between the mediator core and its collaborators
//!
//! Three traits live here:
//! - [`FileProcessor`]: a pluggable unit of logic run against staged files.
//! - [`ObjectStore`]: the storage backend capability (notifications, staging,
//!   plain object I/O).
//! - [`BucketRegistry`]: the orchestration API's bucket registration call.
//!
//! `ObjectStore` and `BucketRegistry` are annotated for `mockall`, so
//! consumers get `MockObjectStore` / `MockBucketRegistry` with the
//! `test-export-mocks` feature (on by default).

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::Path;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::bucket::BucketNameError;
use crate::notification::EventStream;

/// Everything a processor gets to see about one staged file.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub bucket: String,
    /// Decoded object key.
    pub file: String,
    /// File bytes, loaded once before the first processor runs.
    pub content: Bytes,
    pub mime_type: String,
    /// Starts empty. Processors only get a shared reference, so nothing they
    /// do here is seen by later processors.
    pub metadata: HashMap<String, String>,
}

/// Error raised by a processor. Wraps whatever the plugin failed with.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("processor rejected {file}: {reason}")]
    Rejected { file: String, reason: String },
    #[error("I/O failed while processing: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A pluggable file processor.
///
/// The dispatcher only relies on the predicate/action pair; `name` is used to
/// identify the processor in logs and reports.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this processor wants the file.
    fn can_process(&self, file_name: &str, mime_type: &str) -> bool;

    async fn process(&self, ctx: &ProcessingContext) -> Result<(), ProcessorError>;
}

/// Errors reported by an [`ObjectStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("bucket not found: {0}")]
    NoSuchBucket(String),
    #[error(transparent)]
    InvalidBucket(#[from] BucketNameError),
    #[error("object not found: {bucket}/{key}")]
    NoSuchKey { bucket: String, key: String },
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata encoding failed: {0}")]
    Metadata(#[from] serde_json::Error),
    /// Poll/stream level failure of a live subscription.
    #[error("notification transport error: {0}")]
    Transport(String),
}

/// Summary of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Storage backend capability.
///
/// Only `subscribe_object_created`, `fetch_object_to_path` and
/// `remove_local_path` are used by the notification pipeline; the rest serve
/// the upload/download wrappers.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Opens a live subscription to object-created events in `bucket`,
    /// restricted to keys starting with `prefix` and ending with `suffix`
    /// (empty strings match everything).
    async fn subscribe_object_created(
        &self,
        bucket: &str,
        prefix: &str,
        suffix: &str,
    ) -> Result<EventStream, StoreError>;

    /// Copies the object's bytes to `local_path`.
    async fn fetch_object_to_path(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> Result<(), StoreError>;

    /// Removes a previously fetched local copy.
    async fn remove_local_path(&self, local_path: &Path) -> Result<(), StoreError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    async fn make_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    async fn list_buckets(&self) -> Result<Vec<String>, StoreError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<(), StoreError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;

    async fn list_objects(&self, bucket: &str, prefix: &str)
        -> Result<Vec<ObjectInfo>, StoreError>;
}

/// Errors from the orchestration API registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Records which buckets this mediator watches in the orchestration API.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait BucketRegistry: Send + Sync {
    /// Registers `bucket`. `Ok(true)` when newly added, `Ok(false)` when it was
    /// already registered.
    async fn register_bucket(&self, bucket: &str) -> Result<bool, RegistryError>;
}
