//! Active-configuration provider and its time-boxed cache.
//!
//! Backend credentials and model names are operator data that changes rarely
//! but must be picked up without a restart. The provider is an external
//! collaborator; [`ConfigCache`] wraps it with a TTL so job processing never
//! pays a configuration read on every request, while `refresh()` gives
//! operators an immediate reload.

use crate::catalog::BackendId;
use async_trait::async_trait;
use pixelmill_config::Config;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// Error type for configuration provider operations
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to load active configuration: {0}")]
    Load(String),
}

/// Settings for one backend from the active configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub enabled: bool,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

/// The active configuration snapshot: per-backend settings keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveConfiguration {
    pub backends: BTreeMap<BackendId, BackendSettings>,
}

impl ActiveConfiguration {
    /// Settings for one backend, if the configuration mentions it.
    pub fn backend(&self, id: BackendId) -> Option<&BackendSettings> {
        self.backends.get(&id)
    }

    /// A backend is usable iff it is enabled and has a model name.
    pub fn is_enabled(&self, id: BackendId) -> bool {
        self.backend(id)
            .map(|s| s.enabled && s.model.is_some())
            .unwrap_or(false)
    }

    /// Build from the TOML configuration, skipping unknown backend keys.
    pub fn from_config(config: &Config) -> Self {
        let mut backends = BTreeMap::new();
        for (key, settings) in &config.backends {
            match key.parse::<BackendId>() {
                Ok(id) => {
                    backends.insert(
                        id,
                        BackendSettings {
                            enabled: settings.enabled,
                            model: settings.model.clone(),
                            api_key: settings.api_key.clone(),
                            base_url: settings.base_url.clone(),
                            timeout_secs: settings.timeout_secs,
                        },
                    );
                }
                Err(_) => {
                    warn!(backend = %key, "ignoring unknown backend in configuration");
                }
            }
        }
        Self { backends }
    }
}

/// External collaborator supplying the active configuration.
///
/// `Ok(None)` means no configuration exists yet: a first-run condition, not
/// an error to alarm on.
#[async_trait]
pub trait ConfigurationProvider: Send + Sync {
    async fn active_configuration(&self) -> Result<Option<ActiveConfiguration>, ProviderError>;
}

/// Provider that rereads backend settings from the TOML config file, so
/// operator edits land within the cache TTL.
pub struct FileConfigurationProvider {
    path: PathBuf,
}

impl FileConfigurationProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigurationProvider for FileConfigurationProvider {
    async fn active_configuration(&self) -> Result<Option<ActiveConfiguration>, ProviderError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let config = Config::load(&self.path).map_err(|e| ProviderError::Load(e.to_string()))?;
        if config.backends.is_empty() {
            return Ok(None);
        }
        Ok(Some(ActiveConfiguration::from_config(&config)))
    }
}

/// Fixed in-memory provider, for tests and embedded deployments.
pub struct StaticConfigurationProvider {
    config: RwLock<Option<ActiveConfiguration>>,
}

impl StaticConfigurationProvider {
    pub fn new(config: Option<ActiveConfiguration>) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Replace the configuration this provider hands out.
    pub async fn set(&self, config: Option<ActiveConfiguration>) {
        *self.config.write().await = config;
    }
}

#[async_trait]
impl ConfigurationProvider for StaticConfigurationProvider {
    async fn active_configuration(&self) -> Result<Option<ActiveConfiguration>, ProviderError> {
        Ok(self.config.read().await.clone())
    }
}

/// One cached configuration read, tagged with a generation counter.
///
/// The generation only advances when the loaded configuration actually
/// differs, so downstream caches (backend clients) survive no-op reloads.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub generation: u64,
    pub config: Option<Arc<ActiveConfiguration>>,
}

struct CacheSlot {
    value: Option<Option<Arc<ActiveConfiguration>>>,
    last_loaded_at_ms: Option<i64>,
    generation: u64,
}

/// Time-boxed cache over a [`ConfigurationProvider`].
pub struct ConfigCache {
    provider: Arc<dyn ConfigurationProvider>,
    ttl_ms: u64,
    slot: RwLock<CacheSlot>,
}

impl ConfigCache {
    pub fn new(provider: Arc<dyn ConfigurationProvider>, ttl_ms: u64) -> Self {
        Self {
            provider,
            ttl_ms,
            slot: RwLock::new(CacheSlot {
                value: None,
                last_loaded_at_ms: None,
                generation: 0,
            }),
        }
    }

    /// Current configuration, reloading from the provider when the cached
    /// value is missing or older than the TTL.
    pub async fn get(&self) -> Result<ConfigSnapshot, ProviderError> {
        {
            let slot = self.slot.read().await;
            if let (Some(value), Some(loaded_at)) = (&slot.value, slot.last_loaded_at_ms) {
                if current_timestamp_ms().saturating_sub(loaded_at) < self.ttl_ms as i64 {
                    return Ok(ConfigSnapshot {
                        generation: slot.generation,
                        config: value.clone(),
                    });
                }
            }
        }

        let fresh = self.provider.active_configuration().await?.map(Arc::new);

        let mut slot = self.slot.write().await;
        let changed = match &slot.value {
            Some(old) => !same_config(old, &fresh),
            None => true,
        };
        if changed {
            slot.generation += 1;
        }
        slot.value = Some(fresh.clone());
        slot.last_loaded_at_ms = Some(current_timestamp_ms());

        Ok(ConfigSnapshot {
            generation: slot.generation,
            config: fresh,
        })
    }

    /// Drop the cached value so the next `get` hits the provider.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        slot.value = None;
        slot.last_loaded_at_ms = None;
    }

    /// When the cache last loaded from the provider, in Unix milliseconds.
    pub async fn last_loaded_at(&self) -> Option<i64> {
        self.slot.read().await.last_loaded_at_ms
    }
}

fn same_config(
    old: &Option<Arc<ActiveConfiguration>>,
    new: &Option<Arc<ActiveConfiguration>>,
) -> bool {
    match (old, new) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
