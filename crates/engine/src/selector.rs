//! Backend selection for a task type.
//!
//! Ranks catalog backends by a quality/capability score with a live
//! availability penalty, and recommends one backend per task. Scores are
//! deterministic: ties keep catalog order.

use crate::catalog::{BackendDescriptor, BackendId, ModelCapabilityCatalog, TaskType};
use crate::registry::BackendRegistry;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Bonus for declaring every capability the task requires.
const CAPABILITY_BONUS: i32 = 5;
/// Penalty for missing at least one required capability.
const CAPABILITY_PENALTY: i32 = -3;
/// Bonus for meeting the task's quality bar.
const QUALITY_BONUS: i32 = 3;
/// Penalty for being unavailable right now.
const UNAVAILABLE_PENALTY: i32 = -10;

/// Error type for selection operations
#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no backends available for task {0}")]
    NoBackendsAvailable(TaskType),
}

/// Ephemeral ranking output for one backend. Created per selection call.
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub backend: BackendId,
    pub score: i32,
    pub available: bool,
    pub capable: bool,
    /// Human-readable scoring summary for logs and diagnostics.
    pub reason: String,
}

/// Score one descriptor for a task, given its current availability.
///
/// Base score is the catalog quality; capability coverage and the quality
/// bar adjust it; unavailability is the dominant penalty.
pub fn score_backend(descriptor: &BackendDescriptor, task: TaskType, available: bool) -> i32 {
    let mut score = descriptor.quality as i32;

    if descriptor.supports_all(task.required_capabilities()) {
        score += CAPABILITY_BONUS;
    } else {
        score += CAPABILITY_PENALTY;
    }

    if descriptor.quality >= task.required_quality() {
        score += QUALITY_BONUS;
    }

    if !available {
        score += UNAVAILABLE_PENALTY;
    }

    score
}

fn describe_score(descriptor: &BackendDescriptor, task: TaskType, available: bool) -> String {
    let caps = if descriptor.supports_all(task.required_capabilities()) {
        "covers required capabilities"
    } else {
        "missing required capabilities"
    };
    let quality = if descriptor.quality >= task.required_quality() {
        "meets quality bar"
    } else {
        "below quality bar"
    };
    let live = if available { "available" } else { "unavailable" };
    format!(
        "quality {}, {}, {}, {}",
        descriptor.quality, caps, quality, live
    )
}

/// Ranks and recommends backends for a task type.
pub struct ModelSelector {
    catalog: ModelCapabilityCatalog,
    registry: Arc<BackendRegistry>,
}

impl ModelSelector {
    pub fn new(catalog: ModelCapabilityCatalog, registry: Arc<BackendRegistry>) -> Self {
        Self { catalog, registry }
    }

    pub fn catalog(&self) -> &ModelCapabilityCatalog {
        &self.catalog
    }

    /// Every catalog backend scored for `task`, highest score first.
    /// The sort is stable, so equal scores keep catalog order.
    pub async fn rank(&self, task: TaskType) -> Vec<SelectionResult> {
        let mut results = Vec::with_capacity(self.catalog.all_backends().len());

        for descriptor in self.catalog.all_backends() {
            let available = self.registry.is_available(descriptor.id).await;
            let score = score_backend(descriptor, task, available);
            results.push(SelectionResult {
                backend: descriptor.id,
                score,
                available,
                capable: descriptor.supports_all(task.required_capabilities()),
                reason: describe_score(descriptor, task, available),
            });
        }

        results.sort_by(|a, b| b.score.cmp(&a.score));
        results
    }

    /// The backend that should handle `task`.
    ///
    /// An available user preference bypasses scoring entirely. Otherwise the
    /// top-ranked available backend wins, with capability coverage taking
    /// precedence over raw score so a capable backend is never passed over
    /// for an incapable one. With nothing available, the quality-descending
    /// static priority list is the last resort.
    pub async fn recommend(
        &self,
        task: TaskType,
        user_preference: Option<BackendId>,
    ) -> Result<BackendId, SelectError> {
        if let Some(preferred) = user_preference {
            if self.registry.is_available(preferred).await {
                debug!(backend = %preferred, %task, "honoring user backend preference");
                return Ok(preferred);
            }
        }

        let ranked = self.rank(task).await;

        if let Some(best) = ranked.iter().find(|r| r.available && r.capable) {
            return Ok(best.backend);
        }
        if let Some(best) = ranked.iter().find(|r| r.available) {
            return Ok(best.backend);
        }

        self.catalog
            .priority_order()
            .into_iter()
            .next()
            .ok_or(SelectError::NoBackendsAvailable(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendClient, BackendError, GenerateOptions, ImageData, ProcessOptions, ProcessOutput,
        ProducedImage,
    };
    use crate::catalog::{Capability, CostTier};
    use crate::provider::{
        ActiveConfiguration, BackendSettings, ConfigCache, StaticConfigurationProvider,
    };
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    struct StubClient {
        id: BackendId,
    }

    #[async_trait]
    impl BackendClient for StubClient {
        fn id(&self) -> BackendId {
            self.id
        }

        fn describe(&self) -> BackendDescriptor {
            BackendDescriptor {
                id: self.id,
                quality: 0,
                speed: 0,
                cost: CostTier::Low,
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
            Err(BackendError::Transport("stub".to_string()))
        }

        async fn test_connection(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn descriptor(id: BackendId, quality: u8, capabilities: Vec<Capability>) -> BackendDescriptor {
        BackendDescriptor {
            id,
            quality,
            speed: 5,
            cost: CostTier::Standard,
            capabilities,
        }
    }

    fn registry_with_enabled(ids: &[BackendId]) -> Arc<BackendRegistry> {
        let backends: BTreeMap<BackendId, BackendSettings> = ids
            .iter()
            .map(|id| {
                (
                    *id,
                    BackendSettings {
                        enabled: true,
                        model: Some(format!("{}-model", id)),
                        api_key: None,
                        base_url: None,
                        timeout_secs: 120,
                    },
                )
            })
            .collect();
        let provider = Arc::new(StaticConfigurationProvider::new(Some(
            ActiveConfiguration { backends },
        )));
        let cache = Arc::new(ConfigCache::new(provider, 60_000));
        Arc::new(BackendRegistry::new(
            cache,
            Box::new(|id, _| Arc::new(StubClient { id })),
        ))
    }

    #[tokio::test]
    async fn test_rank_orders_by_score() {
        let catalog = ModelCapabilityCatalog::default();
        let registry = registry_with_enabled(BackendId::ALL);
        let selector = ModelSelector::new(catalog, registry);

        let ranked = selector.rank(TaskType::Edit).await;

        assert_eq!(ranked.len(), 4);
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        // flux: 9 + 5 + 3 = 17 leads the default catalog for edit.
        assert_eq!(ranked[0].backend, BackendId::Flux);
        assert_eq!(ranked[0].score, 17);
    }

    #[tokio::test]
    async fn test_rank_penalizes_unavailable() {
        let catalog = ModelCapabilityCatalog::default();
        // Only sdxl is enabled.
        let registry = registry_with_enabled(&[BackendId::Sdxl]);
        let selector = ModelSelector::new(catalog, registry);

        let ranked = selector.rank(TaskType::Edit).await;

        assert_eq!(ranked[0].backend, BackendId::Sdxl);
        assert!(ranked[0].available);
        // sdxl: 7 + 5 + 3 = 15; flux drops to 17 - 10 = 7.
        assert_eq!(ranked[0].score, 15);
    }

    #[tokio::test]
    async fn test_recommend_prefers_capable_backend() {
        // A: quality 10 but lacks edit. B: quality 7 with edit.
        let catalog = ModelCapabilityCatalog::new(vec![
            descriptor(BackendId::Flux, 10, vec![Capability::Generate]),
            descriptor(BackendId::Sdxl, 7, vec![Capability::Edit]),
        ]);
        let registry = registry_with_enabled(&[BackendId::Flux, BackendId::Sdxl]);
        let selector = ModelSelector::new(catalog, registry);

        let picked = selector.recommend(TaskType::Edit, None).await.unwrap();
        assert_eq!(picked, BackendId::Sdxl);
    }

    #[tokio::test]
    async fn test_recommend_honors_available_preference() {
        let catalog = ModelCapabilityCatalog::default();
        let registry = registry_with_enabled(BackendId::ALL);
        let selector = ModelSelector::new(catalog, registry);

        let picked = selector
            .recommend(TaskType::Edit, Some(BackendId::Pixart))
            .await
            .unwrap();
        // Preference wins even though pixart would rank last for edit.
        assert_eq!(picked, BackendId::Pixart);
    }

    #[tokio::test]
    async fn test_recommend_ignores_unavailable_preference() {
        let catalog = ModelCapabilityCatalog::default();
        let registry = registry_with_enabled(&[BackendId::Sdxl]);
        let selector = ModelSelector::new(catalog, registry);

        let picked = selector
            .recommend(TaskType::Edit, Some(BackendId::Flux))
            .await
            .unwrap();
        assert_eq!(picked, BackendId::Sdxl);
    }

    #[tokio::test]
    async fn test_recommend_falls_back_to_priority_order() {
        let catalog = ModelCapabilityCatalog::default();
        // Nothing is enabled.
        let registry = registry_with_enabled(&[]);
        let selector = ModelSelector::new(catalog, registry);

        let picked = selector.recommend(TaskType::Edit, None).await.unwrap();
        // Best quality in the static priority list.
        assert_eq!(picked, BackendId::Flux);
    }

    #[tokio::test]
    async fn test_recommend_empty_catalog_fails() {
        let catalog = ModelCapabilityCatalog::new(vec![]);
        let registry = registry_with_enabled(&[]);
        let selector = ModelSelector::new(catalog, registry);

        let err = selector.recommend(TaskType::Edit, None).await.unwrap_err();
        assert!(matches!(err, SelectError::NoBackendsAvailable(TaskType::Edit)));
    }

    proptest! {
        // Unavailability always costs exactly the documented penalty.
        #[test]
        fn prop_unavailable_penalty_is_constant(quality in 0u8..=10) {
            let d = descriptor(BackendId::Flux, quality, vec![Capability::Edit]);
            for task in [TaskType::Optimize, TaskType::Edit, TaskType::Refine, TaskType::Export] {
                let up = score_backend(&d, task, true);
                let down = score_backend(&d, task, false);
                prop_assert_eq!(up - down, 10);
            }
        }

        // Full capability coverage is worth an 8-point swing over missing it.
        #[test]
        fn prop_capability_swing(quality in 0u8..=10, available in proptest::bool::ANY) {
            let capable = descriptor(BackendId::Sdxl, quality, vec![Capability::Edit]);
            let incapable = descriptor(BackendId::Sdxl, quality, vec![Capability::Generate]);

            let a = score_backend(&capable, TaskType::Edit, available);
            let b = score_backend(&incapable, TaskType::Edit, available);
            prop_assert_eq!(a - b, 8);
        }

        // Score grows monotonically with quality, all else equal.
        #[test]
        fn prop_score_monotonic_in_quality(q1 in 0u8..=10, q2 in 0u8..=10) {
            prop_assume!(q1 < q2);
            let low = descriptor(BackendId::Dalle, q1, vec![Capability::Edit]);
            let high = descriptor(BackendId::Dalle, q2, vec![Capability::Edit]);

            let a = score_backend(&low, TaskType::Edit, true);
            let b = score_backend(&high, TaskType::Edit, true);
            prop_assert!(a <= b);
        }
    }
}
