use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::listener::ObjectFilter;

/// Full mediator configuration, as read from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediatorConfig {
    pub mediator: MediatorIdentity,
    pub storage: StorageConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
    #[serde(default)]
    pub processors: ProcessorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediatorIdentity {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl StorageConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default)]
    pub buckets: Vec<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

impl ListenerConfig {
    pub fn filter(&self) -> ObjectFilter {
        ObjectFilter {
            prefix: self.prefix.clone(),
            suffix: self.suffix.clone(),
        }
    }

    /// Configured staging directory, or `mediator-staging` under the system
    /// temp dir.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("mediator-staging"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorsConfig {
    #[serde(default = "enabled")]
    pub checksum: bool,
    #[serde(default = "enabled")]
    pub json_validation: bool,
    #[serde(default)]
    pub mirror_dir: Option<PathBuf>,
}

impl Default for ProcessorsConfig {
    fn default() -> Self {
        Self {
            checksum: true,
            json_validation: true,
            mirror_dir: None,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn enabled() -> bool {
    true
}

impl MediatorConfig {
    pub fn trace_loaded(&self) {
        info!(
            mediator_id = %self.mediator.id,
            storage_root = %self.storage.root.display(),
            buckets_count = self.listener.buckets.len(),
            remote_registry = self.registry.is_some(),
            "Loaded Config"
        );
        // The api key stays out of the debug dump.
        debug!(
            listener = ?self.listener,
            processors = ?self.processors,
            poll_interval_ms = self.storage.poll_interval_ms,
            registry_url = ?self.registry.as_ref().map(|r| &r.base_url),
            "Config loaded (full debug)"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sections() {
        let raw = r#"{"mediator":{"id":"m-1"},"storage":{"root":"./data"}}"#;
        let config: MediatorConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.storage.poll_interval_ms, 500);
        assert!(config.listener.buckets.is_empty());
        assert!(config.registry.is_none());
        assert!(config.processors.checksum);
        assert!(config.processors.json_validation);
        assert!(config.listener.staging_dir().ends_with("mediator-staging"));
    }
}
