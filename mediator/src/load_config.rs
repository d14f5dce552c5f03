/// `load_config` module: reads the mediator's YAML config and applies environment overrides.
///
/// This is the only place where user-supplied YAML is parsed into
/// [`MediatorConfig`]. Secrets are not expected in the file: the registry API
/// key is injected from `MEDIATOR_REGISTRY_API_KEY`, and `MEDIATOR_STORAGE_ROOT`
/// can point the store elsewhere without editing the file.
///
/// # Errors
/// All errors use `anyhow::Error` and surface at the CLI boundary with the
/// offending path in the message.
use anyhow::Result;
use mediator_core::config::MediatorConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub const REGISTRY_API_KEY_ENV: &str = "MEDIATOR_REGISTRY_API_KEY";
pub const STORAGE_ROOT_ENV: &str = "MEDIATOR_STORAGE_ROOT";

/// Loads a YAML config file and applies environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MediatorConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let mut config: MediatorConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if config.mediator.id.trim().is_empty() {
        error!(config_path = ?path_ref, "Config has an empty mediator id");
        return Err(anyhow::anyhow!("mediator.id must not be empty"));
    }

    apply_env_overrides(&mut config);
    config.trace_loaded();
    Ok(config)
}

fn apply_env_overrides(config: &mut MediatorConfig) {
    if let Some(root) = non_empty_env(STORAGE_ROOT_ENV) {
        info!(env = STORAGE_ROOT_ENV, "Storage root overridden from environment");
        config.storage.root = PathBuf::from(root);
    }
    if let Some(key) = non_empty_env(REGISTRY_API_KEY_ENV) {
        match config.registry.as_mut() {
            Some(registry) => {
                info!(env = REGISTRY_API_KEY_ENV, "Registry API key injected from environment");
                registry.api_key = Some(key);
            }
            None => {
                info!(
                    env = REGISTRY_API_KEY_ENV,
                    "Registry API key set but no registry configured, ignoring"
                );
            }
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
