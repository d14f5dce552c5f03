//! In-process publish/subscribe for upload and notification signals.
//!
//! One [`EventBus`] is created by the composition root and shared by `Arc`
//! with every component that publishes or listens. Delivery is synchronous and
//! follows listener registration order. A listener that fails (returns an
//! error or panics) is logged and skipped; the others still get the event.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener<E> = Arc<dyn Fn(&E) -> Result<(), ListenerError> + Send + Sync>;

/// A file was uploaded through this library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadEvent {
    pub bucket: String,
    pub file: String,
    pub mime_type: String,
    pub metadata: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    /// Identity of the uploader, usually the mediator id.
    pub source: Option<String>,
}

/// A storage notification arrived for a watched bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketNotificationEvent {
    pub bucket: String,
    pub file: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

struct Topic<E> {
    name: &'static str,
    listeners: RwLock<Vec<Listener<E>>>,
}

impl<E> Topic<E> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: RwLock::new(Vec::new()),
        }
    }

    fn subscribe(&self, listener: Listener<E>) {
        self.listeners.write().push(listener);
    }

    fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Delivers to a snapshot of the listeners; returns how many succeeded.
    fn publish(&self, event: &E) -> usize {
        // Listeners may subscribe from inside a callback, so no lock is held
        // while delivering.
        let snapshot = self.listeners.read().clone();
        let mut delivered = 0;
        for (index, listener) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(topic = self.name, listener = index, error = %e, "Event listener failed");
                }
                Err(_) => {
                    warn!(topic = self.name, listener = index, "Event listener panicked");
                }
            }
        }
        delivered
    }
}

pub struct EventBus {
    uploads: Topic<UploadEvent>,
    notifications: Topic<BucketNotificationEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            uploads: Topic::new("upload"),
            notifications: Topic::new("notification"),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_upload<F>(&self, listener: F)
    where
        F: Fn(&UploadEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.uploads.subscribe(Arc::new(listener));
    }

    pub fn on_notification<F>(&self, listener: F)
    where
        F: Fn(&BucketNotificationEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.notifications.subscribe(Arc::new(listener));
    }

    /// Bridges upload events into a channel. Once the receiver is dropped the
    /// bridge fails on each delivery, which is logged and otherwise harmless.
    pub fn subscribe_uploads(&self) -> mpsc::UnboundedReceiver<UploadEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_upload(move |event| tx.send(event.clone()).map_err(|e| e.to_string().into()));
        rx
    }

    pub fn subscribe_notifications(&self) -> mpsc::UnboundedReceiver<BucketNotificationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on_notification(move |event| {
            tx.send(event.clone()).map_err(|e| e.to_string().into())
        });
        rx
    }

    /// Returns the number of listeners that handled the event without error.
    pub fn publish_upload(&self, event: &UploadEvent) -> usize {
        self.uploads.publish(event)
    }

    pub fn publish_notification(&self, event: &BucketNotificationEvent) -> usize {
        self.notifications.publish(event)
    }

    pub fn upload_listener_count(&self) -> usize {
        self.uploads.len()
    }

    pub fn notification_listener_count(&self) -> usize {
        self.notifications.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("upload_listeners", &self.uploads.len())
            .field("notification_listeners", &self.notifications.len())
            .finish()
    }
}
