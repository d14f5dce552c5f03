//! Filesystem-backed [`ObjectStore`].
//!
//! Layout under the root directory:
//! - `<root>/<bucket>/<key>`: object bytes (keys use `/` as separator)
//! - `<root>/.mediator-meta/<bucket>/<key>.json`: custom metadata
//! - `<root>/.mediator-tmp/`: in-progress writes, renamed into place
//!
//! Notifications come from a poller per subscription. The first scan only
//! records what already exists; each later scan reports new or changed files
//! as `s3:ObjectCreated:Put` records. A failed scan goes to the error channel
//! and polling carries on.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bucket::validate_bucket_name;
use crate::contract::{ObjectInfo, ObjectStore, StoreError};
use crate::notification::{event_channel, EventSink, EventStream, NotificationRecord};

const META_DIR: &str = ".mediator-meta";
const TMP_DIR: &str = ".mediator-tmp";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Size and modification time; a change in either counts as a new write.
type FileSignature = (u64, Option<SystemTime>);

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    poll_interval: Duration,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bucket directory. Only valid bucket names are joined onto the root, so
    /// no bucket can point outside it.
    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        validate_bucket_name(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        Ok(self.bucket_path(bucket)?.join(checked_key(key)?))
    }

    fn metadata_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_bucket_name(bucket)?;
        let mut path = self.root.join(META_DIR).join(bucket).join(checked_key(key)?);
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".json");
        path.set_file_name(name);
        Ok(path)
    }

    async fn require_bucket(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        let path = self.bucket_path(bucket)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(path),
            Ok(_) => Err(StoreError::NoSuchBucket(bucket.to_owned())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NoSuchBucket(bucket.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Custom metadata stored with an object; empty when none was written.
    pub async fn object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<HashMap<String, String>, StoreError> {
        match tokio::fs::read(self.metadata_path(bucket, key)?).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes `content` to `target` through a temp file so pollers never see a
    /// partial object.
    async fn write_atomic(&self, target: &Path, content: &[u8]) -> Result<(), StoreError> {
        let tmp_dir = self.root.join(TMP_DIR);
        tokio::fs::create_dir_all(&tmp_dir).await?;
        let tmp = tmp_dir.join(Uuid::new_v4().to_string());
        tokio::fs::write(&tmp, content).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::rename(&tmp, target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Rejects keys that are empty, absolute, or contain empty, `.`, `..` or
/// hidden segments.
fn checked_key(key: &str) -> Result<&Path, StoreError> {
    let valid = !key.is_empty()
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && !segment.starts_with('.'));
    if valid {
        Ok(Path::new(key))
    } else {
        Err(StoreError::InvalidKey(key.to_owned()))
    }
}

/// Walks a bucket directory and returns every object key with its signature,
/// filtered by prefix and suffix. Hidden entries are skipped.
async fn scan_bucket(
    bucket_dir: &Path,
    prefix: &str,
    suffix: &str,
) -> std::io::Result<BTreeMap<String, FileSignature>> {
    let mut found = BTreeMap::new();
    let mut pending = vec![(bucket_dir.to_path_buf(), String::new())];
    while let Some((dir, rel)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let key = if rel.is_empty() {
                name
            } else {
                format!("{rel}/{name}")
            };
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push((entry.path(), key));
            } else if file_type.is_file() && key.starts_with(prefix) && key.ends_with(suffix) {
                let meta = entry.metadata().await?;
                found.insert(key, (meta.len(), meta.modified().ok()));
            }
        }
    }
    Ok(found)
}

async fn poll_bucket(
    bucket: String,
    bucket_dir: PathBuf,
    prefix: String,
    suffix: String,
    interval: Duration,
    mut seen: BTreeMap<String, FileSignature>,
    sink: EventSink,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = sink.stopped() => break,
            _ = ticker.tick() => {}
        }
        match scan_bucket(&bucket_dir, &prefix, &suffix).await {
            Ok(current) => {
                for (key, signature) in &current {
                    if seen.get(key) == Some(signature) {
                        continue;
                    }
                    debug!(bucket = %bucket, key = %key, "Detected new object");
                    if !sink.send_event(NotificationRecord::object_created(&bucket, key, signature.0)) {
                        debug!(bucket = %bucket, "Subscription closed, poller exiting");
                        return;
                    }
                }
                seen = current;
            }
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "Bucket scan failed");
                let error = StoreError::Transport(format!("scan of bucket {bucket} failed: {e}"));
                if !sink.send_error(error) {
                    return;
                }
            }
        }
        if sink.is_stopped() {
            break;
        }
    }
    debug!(bucket = %bucket, "Poller stopped");
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn subscribe_object_created(
        &self,
        bucket: &str,
        prefix: &str,
        suffix: &str,
    ) -> Result<EventStream, StoreError> {
        let bucket_dir = self.require_bucket(bucket).await?;
        let baseline = scan_bucket(&bucket_dir, prefix, suffix).await?;
        let (sink, stream) = event_channel();
        info!(
            bucket,
            existing = baseline.len(),
            interval_ms = self.poll_interval.as_millis() as u64,
            "Started bucket poller"
        );
        tokio::spawn(poll_bucket(
            bucket.to_owned(),
            bucket_dir,
            prefix.to_owned(),
            suffix.to_owned(),
            self.poll_interval,
            baseline,
            sink,
        ));
        Ok(stream)
    }

    async fn fetch_object_to_path(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
    ) -> Result<(), StoreError> {
        self.require_bucket(bucket).await?;
        let source = self.object_path(bucket, key)?;
        match tokio::fs::copy(&source, local_path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NoSuchKey {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_local_path(&self, local_path: &Path) -> Result<(), StoreError> {
        tokio::fs::remove_file(local_path).await?;
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        match self.require_bucket(bucket).await {
            Ok(_) => Ok(true),
            Err(StoreError::NoSuchBucket(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(self.bucket_path(bucket)?).await?;
        info!(bucket, "Created bucket");
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>, StoreError> {
        let mut buckets = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(buckets),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Internal dirs and stray folders are not buckets.
            if validate_bucket_name(&name).is_ok() && entry.file_type().await?.is_dir() {
                buckets.push(name);
            }
        }
        buckets.sort();
        Ok(buckets)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content: Bytes,
        metadata: HashMap<String, String>,
    ) -> Result<(), StoreError> {
        self.require_bucket(bucket).await?;
        let target = self.object_path(bucket, key)?;
        // Metadata first: once the object appears, pollers may report it.
        let meta_path = self.metadata_path(bucket, key)?;
        self.write_atomic(&meta_path, &serde_json::to_vec(&metadata)?)
            .await?;
        self.write_atomic(&target, &content).await?;
        debug!(bucket, key, size = content.len(), "Stored object");
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.require_bucket(bucket).await?;
        match tokio::fs::read(self.object_path(bucket, key)?).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NoSuchKey {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, StoreError> {
        let bucket_dir = self.require_bucket(bucket).await?;
        let found = scan_bucket(&bucket_dir, prefix, "").await?;
        Ok(found
            .into_iter()
            .map(|(key, (size, _))| ObjectInfo { key, size })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::checked_key;

    #[test]
    fn keys_must_stay_inside_the_bucket() {
        assert!(checked_key("a/b/c.txt").is_ok());
        assert!(checked_key("file").is_ok());
        assert!(checked_key("").is_err());
        assert!(checked_key("../escape").is_err());
        assert!(checked_key("/absolute").is_err());
        assert!(checked_key("dir/").is_err());
        assert!(checked_key(".hidden").is_err());
        assert!(checked_key("a/./b").is_err());
        assert!(checked_key("a//b").is_err());
    }
}
