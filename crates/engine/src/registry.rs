//! Backend client registry.
//!
//! Builds one ready-to-use client per backend id from the active
//! configuration and caches it until the configuration generation moves.
//! Concurrent readers during a refresh may briefly use a stale-but-valid
//! client; credentials are versioned by `refresh()`, not by job processing.

use crate::backend::BackendClient;
use crate::catalog::BackendId;
use crate::provider::{BackendSettings, ConfigCache, ProviderError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

/// Error type for registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No active configuration exists yet. A first-run condition, not an
    /// operational alarm.
    #[error("no active configuration")]
    NoConfiguration,

    /// The backend is disabled or has no model name in the active
    /// configuration.
    #[error("backend {0} is not available in the active configuration")]
    BackendUnavailable(BackendId),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Constructor for a concrete client from a backend's settings.
pub type ClientFactory =
    Box<dyn Fn(BackendId, &BackendSettings) -> Arc<dyn BackendClient> + Send + Sync>;

struct ClientSlot {
    generation: u64,
    clients: HashMap<BackendId, Arc<dyn BackendClient>>,
}

/// Caches one client instance per backend, keyed to the configuration
/// generation that produced it.
pub struct BackendRegistry {
    cache: Arc<ConfigCache>,
    factory: ClientFactory,
    slot: RwLock<ClientSlot>,
}

impl BackendRegistry {
    pub fn new(cache: Arc<ConfigCache>, factory: ClientFactory) -> Self {
        Self {
            cache,
            factory,
            slot: RwLock::new(ClientSlot {
                generation: 0,
                clients: HashMap::new(),
            }),
        }
    }

    /// A ready client for `id`, building and caching one if the current
    /// configuration generation has none.
    pub async fn get_client(&self, id: BackendId) -> Result<Arc<dyn BackendClient>, RegistryError> {
        let snapshot = self.cache.get().await?;
        let config = snapshot.config.ok_or(RegistryError::NoConfiguration)?;

        let settings = config
            .backend(id)
            .filter(|_| config.is_enabled(id))
            .ok_or(RegistryError::BackendUnavailable(id))?;

        {
            let slot = self.slot.read().await;
            if slot.generation == snapshot.generation {
                if let Some(client) = slot.clients.get(&id) {
                    return Ok(client.clone());
                }
            }
        }

        let client = (self.factory)(id, settings);

        let mut slot = self.slot.write().await;
        if slot.generation != snapshot.generation {
            debug!(
                old = slot.generation,
                new = snapshot.generation,
                "configuration generation moved, dropping cached clients"
            );
            slot.clients.clear();
            slot.generation = snapshot.generation;
        }
        let client = slot
            .clients
            .entry(id)
            .or_insert_with(|| client.clone())
            .clone();

        Ok(client)
    }

    /// True iff the backend is enabled and has a model name right now.
    pub async fn is_available(&self, id: BackendId) -> bool {
        match self.cache.get().await {
            Ok(snapshot) => snapshot
                .config
                .map(|c| c.is_enabled(id))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Force an immediate configuration reload and drop every cached client.
    pub async fn refresh(&self) {
        self.cache.invalidate().await;
        let mut slot = self.slot.write().await;
        slot.clients.clear();
    }

    /// The configuration cache backing this registry.
    pub fn config_cache(&self) -> &Arc<ConfigCache> {
        &self.cache
    }
}
