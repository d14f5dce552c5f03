//! Bucket registration against the orchestration API.
//!
//! [`HttpBucketRegistry`] reads the mediator's config document from the API,
//! appends the bucket when it is missing and writes the document back.
//! [`LocalBucketRegistry`] keeps the same contract in memory, for mediators
//! running without an orchestration API.
//!
//! Registration is best-effort: callers log a failure and carry on.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::contract::{BucketRegistry, RegistryError};

const API_KEY_HEADER: &str = "x-api-key";

/// The mediator's config document as stored by the orchestration API. Only
/// `buckets` is interpreted; everything else is passed through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteMediatorConfig {
    #[serde(default)]
    pub buckets: Vec<String>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

pub struct HttpBucketRegistry {
    client: reqwest::Client,
    base_url: String,
    mediator_id: String,
    api_key: Option<String>,
}

impl HttpBucketRegistry {
    pub fn new(base_url: &str, mediator_id: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            mediator_id: mediator_id.to_owned(),
            api_key,
        }
    }

    /// Uses `client` for every request instead of a default one.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn config_url(&self) -> String {
        format!("{}/api/mediators/{}/config", self.base_url, self.mediator_id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn fetch_config(&self) -> Result<RemoteMediatorConfig, RegistryError> {
        let url = self.config_url();
        debug!(url = %url, "Fetching mediator config");
        let response = self.authorize(self.client.get(&url)).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Nothing registered yet for this mediator.
            return Ok(RemoteMediatorConfig::default());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn store_config(&self, config: &RemoteMediatorConfig) -> Result<(), RegistryError> {
        let response = self
            .authorize(self.client.put(self.config_url()))
            .json(config)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BucketRegistry for HttpBucketRegistry {
    async fn register_bucket(&self, bucket: &str) -> Result<bool, RegistryError> {
        let mut config = self.fetch_config().await?;
        if config.buckets.iter().any(|b| b == bucket) {
            debug!(bucket, mediator = %self.mediator_id, "Bucket already registered");
            return Ok(false);
        }
        config.buckets.push(bucket.to_owned());
        self.store_config(&config).await?;
        info!(bucket, mediator = %self.mediator_id, "Registered bucket with orchestration API");
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct LocalBucketRegistry {
    buckets: Mutex<BTreeSet<String>>,
}

impl LocalBucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buckets(&self) -> Vec<String> {
        self.buckets.lock().iter().cloned().collect()
    }
}

#[async_trait]
impl BucketRegistry for LocalBucketRegistry {
    async fn register_bucket(&self, bucket: &str) -> Result<bool, RegistryError> {
        let added = self.buckets.lock().insert(bucket.to_owned());
        if added {
            info!(bucket, "Registered bucket locally");
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_registry_reports_duplicates_as_false() {
        let registry = LocalBucketRegistry::new();
        assert!(registry.register_bucket("incoming").await.unwrap());
        assert!(!registry.register_bucket("incoming").await.unwrap());
        assert!(registry.register_bucket("archive").await.unwrap());
        assert_eq!(registry.buckets(), vec!["archive", "incoming"]);
    }

    #[test]
    fn config_url_ignores_trailing_slash() {
        let registry = HttpBucketRegistry::new("https://orchestrator.test/", "m-1", None);
        assert_eq!(
            registry.config_url(),
            "https://orchestrator.test/api/mediators/m-1/config"
        );
    }

    #[test]
    fn remote_config_keeps_unknown_fields() {
        let raw = r#"{"buckets":["a1b"],"heartbeat":30,"name":"m"}"#;
        let mut config: RemoteMediatorConfig = serde_json::from_str(raw).unwrap();
        config.buckets.push("c2d".into());
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["heartbeat"], 30);
        assert_eq!(value["buckets"], serde_json::json!(["a1b", "c2d"]));
    }
}
