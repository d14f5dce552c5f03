#![doc = "mediator-core: bucket notification mediation library."]

//! This crate holds the mediator's business logic: it subscribes to
//! object-created notifications on storage buckets, stages each new object
//! locally, classifies it and fans it out to registered file processors.
//!
//! # Layout
//! - [`contract`]: the seams (`ObjectStore`, `BucketRegistry`, `FileProcessor`).
//! - [`listener`] and [`dispatcher`]: the notification pipeline.
//! - [`processor`] and [`bus`]: processor registry and in-process event bus.
//! - [`fs_store`], [`registry`], [`builtin`]: concrete backends and processors.
//! - [`transfer`]: upload/download wrappers used by the CLI.
//!
//! The CLI crate `mediator` wires these together from a YAML config.

pub mod bucket;
pub mod builtin;
pub mod bus;
pub mod config;
pub mod contract;
pub mod dispatcher;
pub mod fs_store;
pub mod listener;
pub mod mime;
pub mod notification;
pub mod processor;
pub mod registry;
pub mod transfer;

pub use bus::{BucketNotificationEvent, EventBus, UploadEvent};
pub use contract::{
    BucketRegistry, FileProcessor, ObjectStore, ProcessingContext, ProcessorError, StoreError,
};
pub use dispatcher::{DispatchOutcome, DispatchReport, NotificationDispatcher};
pub use listener::{ListenError, NotificationListener, ObjectFilter};
pub use notification::NotificationRecord;
pub use processor::ProcessorRegistry;
pub use transfer::{BucketClient, UploadReceipt, UploadRequest};
