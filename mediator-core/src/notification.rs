//! Storage notification records and the stream that carries them.
//!
//! A backend hands out an [`EventStream`] per subscription and keeps the
//! matching [`EventSink`] for itself. Events and transport errors travel on two
//! independent channels: an error never closes the event channel. Calling
//! [`EventStream::stop`] ends both and tells the backend's poller to exit.

use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::contract::StoreError;

/// Event name filter used for every subscription.
pub const OBJECT_CREATED_ALL: &str = "s3:ObjectCreated:*";
/// Event name emitted for a plain put.
pub const OBJECT_CREATED_PUT: &str = "s3:ObjectCreated:Put";

/// Characters left unescaped in object keys carried by notifications.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// One S3-style notification record.
///
/// Every field is optional on the wire; the dispatcher decides what a usable
/// record is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Entity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<S3Bucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<S3Object>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Object {
    /// URL-encoded object key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl NotificationRecord {
    /// Builds an object-created record the way backends report it, with the
    /// key URL-encoded.
    pub fn object_created(bucket: &str, key: &str, size: u64) -> Self {
        Self {
            event_name: Some(OBJECT_CREATED_PUT.to_owned()),
            event_time: Some(Utc::now()),
            s3: Some(S3Entity {
                bucket: Some(S3Bucket {
                    name: bucket.to_owned(),
                }),
                object: Some(S3Object {
                    key: Some(encode_key(key)),
                    size: Some(size),
                    ..Default::default()
                }),
            }),
        }
    }

    pub fn bucket_name(&self) -> Option<&str> {
        self.s3
            .as_ref()
            .and_then(|s3| s3.bucket.as_ref())
            .map(|b| b.name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// Raw (still encoded) object key, if present and non-empty.
    pub fn raw_key(&self) -> Option<&str> {
        self.s3
            .as_ref()
            .and_then(|s3| s3.object.as_ref())
            .and_then(|o| o.key.as_deref())
            .filter(|k| !k.trim().is_empty())
    }

    /// Decoded object key. `None` when the key is missing, empty or not valid
    /// UTF-8 once decoded.
    pub fn object_key(&self) -> Option<String> {
        decode_key(self.raw_key()?).filter(|k| !k.is_empty())
    }

    pub fn event_name_or_default(&self) -> &str {
        self.event_name.as_deref().unwrap_or(OBJECT_CREATED_ALL)
    }
}

/// URL-encodes an object key for transport in a notification.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Decodes a notification key (`+` means space, `%XX` escapes).
pub fn decode_key(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|k| k.into_owned())
}

/// Item yielded by an [`EventStream`].
#[derive(Debug)]
pub enum StreamItem {
    Event(NotificationRecord),
    Error(StoreError),
}

/// Producer half, owned by the backend's poller.
#[derive(Debug, Clone)]
pub struct EventSink {
    events: mpsc::UnboundedSender<NotificationRecord>,
    errors: mpsc::UnboundedSender<StoreError>,
    stop: CancellationToken,
}

/// Consumer half of a subscription.
#[derive(Debug)]
pub struct EventStream {
    events: mpsc::UnboundedReceiver<NotificationRecord>,
    errors: mpsc::UnboundedReceiver<StoreError>,
    stop: CancellationToken,
    events_closed: bool,
    errors_closed: bool,
}

/// Creates a connected sink/stream pair.
pub fn event_channel() -> (EventSink, EventStream) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (error_tx, error_rx) = mpsc::unbounded_channel();
    let stop = CancellationToken::new();
    (
        EventSink {
            events: event_tx,
            errors: error_tx,
            stop: stop.clone(),
        },
        EventStream {
            events: event_rx,
            errors: error_rx,
            stop,
            events_closed: false,
            errors_closed: false,
        },
    )
}

impl EventSink {
    /// Returns `false` once the subscription is stopped or the stream dropped.
    pub fn send_event(&self, record: NotificationRecord) -> bool {
        !self.stop.is_cancelled() && self.events.send(record).is_ok()
    }

    pub fn send_error(&self, error: StoreError) -> bool {
        !self.stop.is_cancelled() && self.errors.send(error).is_ok()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled() || (self.events.is_closed() && self.errors.is_closed())
    }

    /// Resolves when the consumer calls [`EventStream::stop`].
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }
}

impl EventStream {
    /// Next event or transport error. `None` after [`stop`](Self::stop), or
    /// once the backend has dropped its sink and both channels are drained.
    pub async fn next(&mut self) -> Option<StreamItem> {
        loop {
            if self.events_closed && self.errors_closed {
                return None;
            }
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => return None,
                event = self.events.recv(), if !self.events_closed => match event {
                    Some(record) => return Some(StreamItem::Event(record)),
                    None => self.events_closed = true,
                },
                error = self.errors.recv(), if !self.errors_closed => match error {
                    Some(err) => return Some(StreamItem::Error(err)),
                    None => self.errors_closed = true,
                },
            }
        }
    }

    /// Ends both channels and signals the producer. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Token that stops this stream when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop.clone()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
