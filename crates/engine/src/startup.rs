//! Startup checks for the pixelmill daemon.
//!
//! Provides preflight checks run before the engine accepts work:
//! - configuration sanity (known backend ids, coherent retry/limit values)
//! - optional connectivity probes against each enabled backend

use crate::catalog::BackendId;
use crate::registry::{BackendRegistry, RegistryError};
use pixelmill_config::Config;
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("backend {backend} connectivity check failed: {message}")]
    Connectivity { backend: BackendId, message: String },
}

/// Validate the loaded configuration before anything starts.
pub fn validate_config(config: &Config) -> Result<(), StartupError> {
    for key in config.backends.keys() {
        if key.parse::<BackendId>().is_err() {
            return Err(StartupError::Config(format!(
                "unknown backend '{}' in [backends]",
                key
            )));
        }
    }

    if config.engine.max_attempts == 0 {
        return Err(StartupError::Config(
            "engine.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.retry.max_retries_per_backend == 0 {
        return Err(StartupError::Config(
            "retry.max_retries_per_backend must be at least 1".to_string(),
        ));
    }

    if config.retry.base_delay_ms == 0 || config.retry.base_delay_ms > config.retry.max_delay_ms {
        return Err(StartupError::Config(format!(
            "retry.base_delay_ms ({}) must be positive and no larger than retry.max_delay_ms ({})",
            config.retry.base_delay_ms, config.retry.max_delay_ms
        )));
    }

    if config.server.bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(StartupError::Config(format!(
            "server.bind '{}' is not a valid socket address",
            config.server.bind
        )));
    }

    for (key, backend) in &config.backends {
        if backend.timeout_secs == 0 {
            return Err(StartupError::Config(format!(
                "backends.{}.timeout_secs must be at least 1",
                key
            )));
        }
    }

    Ok(())
}

/// Probe every enabled backend's connectivity.
///
/// Returns the number of backends probed. A missing active configuration is
/// a first-run condition and probes nothing.
pub async fn run_connectivity_checks(
    config: &Config,
    registry: &BackendRegistry,
) -> Result<usize, StartupError> {
    let mut checked = 0;

    for key in config.backends.keys() {
        let Ok(id) = key.parse::<BackendId>() else {
            continue;
        };
        let client = match registry.get_client(id).await {
            Ok(client) => client,
            Err(RegistryError::NoConfiguration) => {
                info!("no active configuration yet, skipping connectivity checks");
                return Ok(0);
            }
            Err(RegistryError::BackendUnavailable(_)) => {
                continue;
            }
            Err(e) => {
                warn!(backend = %id, error = %e, "skipping connectivity check");
                continue;
            }
        };

        client
            .test_connection()
            .await
            .map_err(|e| StartupError::Connectivity {
                backend: id,
                message: e.to_string(),
            })?;
        info!(backend = %id, "backend connectivity verified");
        checked += 1;
    }

    Ok(checked)
}

/// Run the full startup sequence: config sanity first, then connectivity.
pub async fn run_startup_checks(
    config: &Config,
    registry: &BackendRegistry,
    skip_connectivity: bool,
) -> Result<(), StartupError> {
    validate_config(config)?;
    if !skip_connectivity {
        run_connectivity_checks(config, registry).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendClient, BackendError, GenerateOptions, ImageData, ProcessOptions, ProcessOutput,
        ProducedImage,
    };
    use crate::catalog::{BackendDescriptor, CostTier};
    use crate::provider::{
        ActiveConfiguration, BackendSettings, ConfigCache, StaticConfigurationProvider,
    };
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn config_with_backend(key: &str) -> Config {
        Config::parse_toml(&format!(
            r#"
[backends.{}]
model = "some-model"
"#,
            key
        ))
        .unwrap()
    }

    #[test]
    fn test_valid_default_config_passes() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let err = validate_config(&config_with_backend("mystery")).unwrap_err();
        assert!(matches!(err, StartupError::Config(_)));
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let mut config = Config::default();
        config.engine.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_base_delay_larger_than_max_rejected() {
        let mut config = Config::default();
        config.retry.base_delay_ms = 60_000;
        config.retry.max_delay_ms = 1_000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_bind_address_rejected() {
        let mut config = Config::default();
        config.server.bind = "not-an-address".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_backend_timeout_rejected() {
        let mut config = config_with_backend("flux");
        config.backends.get_mut("flux").unwrap().timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    struct ProbeClient {
        id: BackendId,
        healthy: bool,
    }

    #[async_trait]
    impl BackendClient for ProbeClient {
        fn id(&self) -> BackendId {
            self.id
        }

        fn describe(&self) -> BackendDescriptor {
            BackendDescriptor {
                id: self.id,
                quality: 5,
                speed: 5,
                cost: CostTier::Standard,
                capabilities: vec![],
            }
        }

        async fn process(
            &self,
            _image: &ImageData,
            _options: &ProcessOptions,
        ) -> Result<ProcessOutput, BackendError> {
            Ok(ProcessOutput::default())
        }

        async fn generate(
            &self,
            _options: &GenerateOptions,
        ) -> Result<ProducedImage, BackendError> {
            Err(BackendError::Transport("unused".to_string()))
        }

        async fn test_connection(&self) -> Result<(), BackendError> {
            if self.healthy {
                Ok(())
            } else {
                Err(BackendError::from_status(401, "bad key"))
            }
        }
    }

    fn registry_with(healthy: bool) -> BackendRegistry {
        let mut backends = BTreeMap::new();
        backends.insert(
            BackendId::Flux,
            BackendSettings {
                enabled: true,
                model: Some("flux-pro-1.1".to_string()),
                api_key: None,
                base_url: None,
                timeout_secs: 30,
            },
        );
        let provider = Arc::new(StaticConfigurationProvider::new(Some(
            ActiveConfiguration { backends },
        )));
        let cache = Arc::new(ConfigCache::new(provider, 60_000));
        BackendRegistry::new(
            cache,
            Box::new(move |id, _| {
                let client: Arc<dyn BackendClient> = Arc::new(ProbeClient { id, healthy });
                client
            }),
        )
    }

    #[tokio::test]
    async fn test_connectivity_probe_counts_enabled_backends() {
        let registry = registry_with(true);
        let config = config_with_backend("flux");

        let checked = run_connectivity_checks(&config, &registry).await.unwrap();
        assert_eq!(checked, 1);
    }

    #[tokio::test]
    async fn test_connectivity_failure_names_backend() {
        let registry = registry_with(false);
        let config = config_with_backend("flux");

        let err = run_connectivity_checks(&config, &registry)
            .await
            .unwrap_err();
        match err {
            StartupError::Connectivity { backend, .. } => assert_eq!(backend, BackendId::Flux),
            other => panic!("expected Connectivity, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_no_configuration_probes_nothing() {
        let provider = Arc::new(StaticConfigurationProvider::new(None));
        let cache = Arc::new(ConfigCache::new(provider, 60_000));
        let registry = BackendRegistry::new(
            cache,
            Box::new(|id, _| {
                let client: Arc<dyn BackendClient> = Arc::new(ProbeClient { id, healthy: true });
                client
            }),
        );
        let config = config_with_backend("flux");

        let checked = run_connectivity_checks(&config, &registry).await.unwrap();
        assert_eq!(checked, 0);
    }
}
