//! Per-notification pipeline: stage → classify → fan out → clean up.
//!
//! # Flow for one record
//! 1. Resolve bucket and decoded object key. Invalid bucket or no usable key:
//!    warn, drop.
//! 2. Publish a [`BucketNotificationEvent`] on the bus, whatever happens next.
//! 3. Fetch the object to a unique path in the staging directory.
//! 4. Classify the mime type and load the staged bytes once.
//! 5. Run every matching processor in registration order. A processor error
//!    or panic is logged and the loop continues.
//! 6. Remove the staged copy.
//!
//! A fetch failure ends the dispatch after logging; nothing was staged so
//! nothing is removed. [`NotificationDispatcher::dispatch`] never fails: all
//! outcomes are logged and summarised in the returned [`DispatchReport`].

use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::bucket::validate_bucket_name;
use crate::bus::{BucketNotificationEvent, EventBus};
use crate::contract::{ObjectStore, ProcessingContext};
use crate::mime;
use crate::notification::NotificationRecord;
use crate::processor::ProcessorRegistry;

/// Longest flattened key kept in a staging file name. With the uuid prefix
/// the whole name stays under the 255-byte file name limit.
const MAX_STAGED_NAME_LEN: usize = 180;
/// Longest suffix still treated as an extension when shortening a name.
const MAX_EXTENSION_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The record had no usable object key.
    Dropped { reason: String },
    /// Fetching or reading the staged copy failed; no processor ran.
    StagingFailed { error: String },
    /// Processors ran (possibly none matched).
    Completed {
        mime_type: String,
        /// Processors invoked, in order.
        invoked: Vec<String>,
        /// Subset of `invoked` that failed.
        failed: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub bucket: String,
    /// Decoded key, when one could be resolved.
    pub file: Option<String>,
    pub outcome: DispatchOutcome,
    /// Whether the staged copy was removed.
    pub cleaned_up: bool,
}

impl DispatchReport {
    pub fn invoked(&self) -> &[String] {
        match &self.outcome {
            DispatchOutcome::Completed { invoked, .. } => invoked,
            _ => &[],
        }
    }

    pub fn failed(&self) -> &[String] {
        match &self.outcome {
            DispatchOutcome::Completed { failed, .. } => failed,
            _ => &[],
        }
    }
}

pub struct NotificationDispatcher {
    store: Arc<dyn ObjectStore>,
    processors: Arc<ProcessorRegistry>,
    bus: Arc<EventBus>,
    staging_dir: PathBuf,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        processors: Arc<ProcessorRegistry>,
        bus: Arc<EventBus>,
        staging_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            processors,
            bus,
            staging_dir: staging_dir.into(),
        }
    }

    /// Handles one record received on the subscription for `subscribed_bucket`.
    pub async fn dispatch(
        &self,
        subscribed_bucket: &str,
        record: NotificationRecord,
    ) -> DispatchReport {
        let bucket = record
            .bucket_name()
            .unwrap_or(subscribed_bucket)
            .to_owned();

        if let Err(e) = validate_bucket_name(&bucket) {
            let reason = e.to_string();
            warn!(bucket = %bucket, event = ?record.event_name, %reason, "[DISPATCH] Dropping notification for invalid bucket");
            return DispatchReport {
                bucket,
                file: None,
                outcome: DispatchOutcome::Dropped { reason },
                cleaned_up: false,
            };
        }

        let Some(file) = record.object_key() else {
            let reason = match record.raw_key() {
                Some(raw) => format!("object key {raw:?} could not be decoded"),
                None => "notification has no object key".to_owned(),
            };
            warn!(bucket = %bucket, event = ?record.event_name, %reason, "[DISPATCH] Dropping malformed notification");
            return DispatchReport {
                bucket,
                file: None,
                outcome: DispatchOutcome::Dropped { reason },
                cleaned_up: false,
            };
        };

        let span = tracing::info_span!("dispatch", bucket = %bucket, file = %file);
        self.run(bucket, file, record.event_name_or_default().to_owned())
            .instrument(span)
            .await
    }

    async fn run(&self, bucket: String, file: String, event_type: String) -> DispatchReport {
        info!(event_type = %event_type, "[DISPATCH] Notification received");
        self.bus.publish_notification(&BucketNotificationEvent {
            bucket: bucket.clone(),
            file: file.clone(),
            event_type,
            timestamp: Utc::now(),
        });

        // --- Stage ---
        let staged_path = self.staging_path(&file);
        if let Err(e) = self.fetch(&bucket, &file, &staged_path).await {
            error!(error = %e, "[DISPATCH][ERROR] Failed to stage object, skipping processors");
            return DispatchReport {
                bucket,
                file: Some(file),
                outcome: DispatchOutcome::StagingFailed {
                    error: e.to_string(),
                },
                cleaned_up: false,
            };
        }
        debug!(path = %staged_path.display(), "[DISPATCH] Object staged");

        let content = match tokio::fs::read(&staged_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, path = %staged_path.display(), "[DISPATCH][ERROR] Failed to read staged copy");
                let cleaned_up = self.cleanup(&staged_path).await;
                return DispatchReport {
                    bucket,
                    file: Some(file),
                    outcome: DispatchOutcome::StagingFailed {
                        error: e.to_string(),
                    },
                    cleaned_up,
                };
            }
        };

        // --- Classify ---
        let mime_type = mime::classify(&file);
        let ctx = ProcessingContext {
            bucket: bucket.clone(),
            file: file.clone(),
            content: content.into(),
            mime_type: mime_type.clone(),
            metadata: HashMap::new(),
        };

        // --- Fan out ---
        let mut invoked = Vec::new();
        let mut failed = Vec::new();
        for processor in self.processors.list() {
            let name = processor.name().to_owned();
            if !processor.can_process(&ctx.file, &ctx.mime_type) {
                debug!(processor = %name, mime_type = %ctx.mime_type, "[DISPATCH] Processor skipped");
                continue;
            }
            invoked.push(name.clone());
            match AssertUnwindSafe(processor.process(&ctx)).catch_unwind().await {
                Ok(Ok(())) => {
                    info!(processor = %name, "[DISPATCH] Processor completed");
                }
                Ok(Err(e)) => {
                    error!(processor = %name, file = %ctx.file, error = %e, "[DISPATCH][ERROR] Processor failed");
                    failed.push(name);
                }
                Err(_) => {
                    error!(processor = %name, file = %ctx.file, "[DISPATCH][ERROR] Processor panicked");
                    failed.push(name);
                }
            }
        }

        // --- Clean up ---
        let cleaned_up = self.cleanup(&staged_path).await;
        info!(
            invoked = invoked.len(),
            failed = failed.len(),
            mime_type = %mime_type,
            "[DISPATCH] Notification handled"
        );

        DispatchReport {
            bucket,
            file: Some(file),
            outcome: DispatchOutcome::Completed {
                mime_type,
                invoked,
                failed,
            },
            cleaned_up,
        }
    }

    async fn fetch(
        &self,
        bucket: &str,
        key: &str,
        staged_path: &Path,
    ) -> Result<(), crate::contract::StoreError> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        self.store
            .fetch_object_to_path(bucket, key, staged_path)
            .await
    }

    async fn cleanup(&self, staged_path: &Path) -> bool {
        match self.store.remove_local_path(staged_path).await {
            Ok(()) => {
                debug!(path = %staged_path.display(), "[DISPATCH] Removed staged copy");
                true
            }
            Err(e) => {
                warn!(path = %staged_path.display(), error = %e, "[DISPATCH] Failed to remove staged copy");
                false
            }
        }
    }

    /// Unique staging path: a random prefix plus the key with `/` flattened to
    /// `__`, keeping as many trailing segments as fit.
    fn staging_path(&self, key: &str) -> PathBuf {
        self.staging_dir
            .join(format!("{}-{}", Uuid::new_v4(), flatten_key(key)))
    }
}

/// Flattens `a/b/c.txt` into `a__b__c.txt`, dropping leading segments while
/// the result is too long. A basename that is too long on its own is cut
/// down, keeping its extension.
fn flatten_key(key: &str) -> String {
    let mut segments: Vec<&str> = key
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    let Some(basename) = segments.pop() else {
        return "object".to_owned();
    };
    for from in 0..=segments.len() {
        let joined = if from < segments.len() {
            segments[from..].join("__") + "__" + basename
        } else {
            basename.to_owned()
        };
        if joined.len() <= MAX_STAGED_NAME_LEN {
            return joined;
        }
    }
    shorten_name(basename, MAX_STAGED_NAME_LEN)
}

/// Cuts `name` to at most `max` bytes on a char boundary. A short extension
/// is kept so the staged copy still classifies the same way.
fn shorten_name(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_owned();
    }
    let extension = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_EXTENSION_LEN => &name[dot..],
        _ => "",
    };
    let stem = &name[..name.len() - extension.len()];
    let mut cut = max - extension.len();
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &stem[..cut], extension)
}
