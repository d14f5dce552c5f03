//! Composition root: builds every mediator component from a loaded config.

use std::sync::Arc;
use tracing::info;

use mediator_core::builtin::{ChecksumProcessor, JsonValidationProcessor, MirrorProcessor};
use mediator_core::config::MediatorConfig;
use mediator_core::contract::{BucketRegistry, ObjectStore};
use mediator_core::fs_store::FsObjectStore;
use mediator_core::registry::{HttpBucketRegistry, LocalBucketRegistry};
use mediator_core::{
    BucketClient, EventBus, NotificationDispatcher, NotificationListener, ProcessorRegistry,
};

/// A fully wired mediator. Everything shares one store and one event bus.
pub struct Mediator {
    pub config: MediatorConfig,
    pub store: Arc<dyn ObjectStore>,
    pub bus: Arc<EventBus>,
    pub processors: Arc<ProcessorRegistry>,
    pub listener: NotificationListener,
    pub client: BucketClient,
}

impl Mediator {
    pub fn from_config(config: MediatorConfig) -> Self {
        let store: Arc<dyn ObjectStore> = Arc::new(
            FsObjectStore::new(&config.storage.root)
                .with_poll_interval(config.storage.poll_interval()),
        );
        let bus = Arc::new(EventBus::new());

        let registry: Arc<dyn BucketRegistry> = match &config.registry {
            Some(remote) => {
                info!(base_url = %remote.base_url, "Using orchestration API bucket registry");
                Arc::new(HttpBucketRegistry::new(
                    &remote.base_url,
                    &config.mediator.id,
                    remote.api_key.clone(),
                ))
            }
            None => {
                info!("No registry configured, registering buckets in-process");
                Arc::new(LocalBucketRegistry::new())
            }
        };

        let processors = Arc::new(ProcessorRegistry::new());
        if config.processors.checksum {
            processors.register(Arc::new(ChecksumProcessor));
        }
        if config.processors.json_validation {
            processors.register(Arc::new(JsonValidationProcessor));
        }
        if let Some(mirror_dir) = &config.processors.mirror_dir {
            processors.register(Arc::new(MirrorProcessor::new(mirror_dir)));
        }

        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            processors.clone(),
            bus.clone(),
            config.listener.staging_dir(),
        ));
        let listener =
            NotificationListener::new(store.clone(), dispatcher, config.listener.filter());
        let client = BucketClient::new(store.clone(), registry, bus.clone())
            .with_source(config.mediator.id.clone());

        Self {
            config,
            store,
            bus,
            processors,
            listener,
            client,
        }
    }

    /// Configured buckets followed by `extra`, without duplicates.
    pub fn buckets_to_watch(&self, extra: &[String]) -> Vec<String> {
        let mut buckets: Vec<String> = Vec::new();
        for bucket in self.config.listener.buckets.iter().chain(extra) {
            if !buckets.contains(bucket) {
                buckets.push(bucket.clone());
            }
        }
        buckets
    }
}
