//! Subscription manager: one live object-created subscription per bucket.
//!
//! Each subscription gets a pump task that reads its [`EventStream`]. Events
//! are handed to the [`NotificationDispatcher`] on their own task, so several
//! notifications can be in flight at once. Transport errors are logged and the
//! subscription stays open; the backend keeps polling. A subscription the
//! backend ends on its own is forgotten, so the bucket can be subscribed again.
//!
//! `start_listening` and `stop_listening` must not race each other on the same
//! listener.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};

use crate::bucket::{validate_bucket_name, BucketNameError};
use crate::contract::{ObjectStore, StoreError};
use crate::dispatcher::NotificationDispatcher;
use crate::notification::{EventStream, StreamItem, OBJECT_CREATED_ALL};

#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    #[error(transparent)]
    InvalidBucket(#[from] BucketNameError),
    #[error("failed to subscribe to bucket {bucket}: {source}")]
    SubscriptionOpen {
        bucket: String,
        #[source]
        source: StoreError,
    },
}

/// Key filters applied to every subscribed bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    pub prefix: String,
    pub suffix: String,
}

/// Bookkeeping for one active subscription.
#[derive(Debug)]
pub struct BucketSubscription {
    pub bucket: String,
    pub filter: ObjectFilter,
    pub event_type: &'static str,
    id: u64,
    stop: CancellationToken,
    pump: JoinHandle<()>,
}

type Subscriptions = Arc<Mutex<BTreeMap<String, BucketSubscription>>>;

pub struct NotificationListener {
    store: Arc<dyn ObjectStore>,
    dispatcher: Arc<NotificationDispatcher>,
    filter: ObjectFilter,
    subscriptions: Subscriptions,
    next_id: AtomicU64,
    in_flight: TaskTracker,
}

impl NotificationListener {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        dispatcher: Arc<NotificationDispatcher>,
        filter: ObjectFilter,
    ) -> Self {
        Self {
            store,
            dispatcher,
            filter,
            subscriptions: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
            in_flight: TaskTracker::new(),
        }
    }

    /// Subscribes to every bucket in `buckets` that is not yet subscribed.
    ///
    /// Returns the buckets that were newly subscribed. On the first failure
    /// the error is returned; subscriptions opened before it (in this call or
    /// earlier ones) stay active.
    pub async fn start_listening<S: AsRef<str>>(
        &self,
        buckets: &[S],
    ) -> Result<Vec<String>, ListenError> {
        let mut started = Vec::new();
        for bucket in buckets.iter().map(AsRef::as_ref) {
            if self.is_listening(bucket) {
                info!(bucket, "[LISTEN] Already listening on bucket, skipping");
                continue;
            }
            validate_bucket_name(bucket)?;

            let stream = self
                .store
                .subscribe_object_created(bucket, &self.filter.prefix, &self.filter.suffix)
                .await
                .map_err(|source| {
                    error!(bucket, error = %source, "[LISTEN][ERROR] Failed to open subscription");
                    ListenError::SubscriptionOpen {
                        bucket: bucket.to_owned(),
                        source,
                    }
                })?;

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let stop = stream.stop_handle();
            {
                // Held until the entry is in place so a pump that ends at
                // once still finds it.
                let mut subscriptions = self.subscriptions.lock();
                let pump = tokio::spawn(
                    pump(
                        bucket.to_owned(),
                        id,
                        stream,
                        self.dispatcher.clone(),
                        self.subscriptions.clone(),
                        self.in_flight.clone(),
                    )
                    .instrument(tracing::info_span!("subscription", bucket = %bucket)),
                );
                subscriptions.insert(
                    bucket.to_owned(),
                    BucketSubscription {
                        bucket: bucket.to_owned(),
                        filter: self.filter.clone(),
                        event_type: OBJECT_CREATED_ALL,
                        id,
                        stop,
                        pump,
                    },
                );
            }
            info!(
                bucket,
                prefix = %self.filter.prefix,
                suffix = %self.filter.suffix,
                "[LISTEN] Listening for object-created notifications"
            );
            started.push(bucket.to_owned());
        }
        Ok(started)
    }

    /// Stops every subscription and forgets them. Dispatches already running
    /// are not cancelled; see [`wait_idle`](Self::wait_idle).
    pub async fn stop_listening(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        if subscriptions.is_empty() {
            debug!("[LISTEN] stop_listening called with no active subscriptions");
            return;
        }
        for (bucket, subscription) in subscriptions {
            subscription.stop.cancel();
            if let Err(e) = subscription.pump.await {
                warn!(bucket = %bucket, error = %e, "[LISTEN] Subscription pump ended abnormally");
            }
            info!(bucket = %bucket, "[LISTEN] Stopped listening");
        }
    }

    pub fn is_listening(&self, bucket: &str) -> bool {
        self.subscriptions.lock().contains_key(bucket)
    }

    /// Buckets with an active subscription, sorted.
    pub fn listening_buckets(&self) -> Vec<String> {
        self.subscriptions.lock().keys().cloned().collect()
    }

    /// Number of dispatches currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Waits until every dispatch started so far has finished.
    pub async fn wait_idle(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }
}

impl Drop for NotificationListener {
    fn drop(&mut self) {
        for subscription in self.subscriptions.lock().values() {
            subscription.stop.cancel();
        }
    }
}

async fn pump(
    bucket: String,
    id: u64,
    mut stream: EventStream,
    dispatcher: Arc<NotificationDispatcher>,
    subscriptions: Subscriptions,
    in_flight: TaskTracker,
) {
    while let Some(item) = stream.next().await {
        match item {
            StreamItem::Event(record) => {
                let dispatcher = dispatcher.clone();
                let bucket = bucket.clone();
                in_flight.spawn(async move {
                    dispatcher.dispatch(&bucket, record).await;
                });
            }
            StreamItem::Error(e) => {
                warn!(error = %e, "[LISTEN] Notification transport error, subscription stays open");
            }
        }
    }
    if stream.is_stopped() {
        debug!("[LISTEN] Subscription pump finished");
        return;
    }

    warn!("[LISTEN] Backend ended the subscription, bucket is no longer watched");
    let mut subscriptions = subscriptions.lock();
    if subscriptions.get(&bucket).is_some_and(|s| s.id == id) {
        subscriptions.remove(&bucket);
    }
}
