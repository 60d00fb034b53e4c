//! Multi-backend fallback execution.
//!
//! Runs a unit of work against a ranked backend list with bounded
//! per-backend retries. Rate-limit signals skip the remaining retries for a
//! backend immediately; fatal authentication failures do the same. The full
//! attempt chain is reported either way so a failed job can explain exactly
//! what was tried.

use crate::backend::{BackendClient, BackendError};
use crate::catalog::{BackendId, TaskType};
use crate::registry::BackendRegistry;
use crate::retry::BackoffPolicy;
use crate::selector::ModelSelector;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How one try against one backend ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    RateLimited,
    Fatal,
}

/// Ephemeral record of one try, kept only for the chain report.
#[derive(Debug, Clone)]
pub struct FallbackAttempt {
    pub backend: BackendId,
    /// 1-based attempt number within this backend.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

/// Successful execution: the work's result plus the chain that led to it.
#[derive(Debug)]
pub struct FallbackSuccess<T> {
    pub result: T,
    pub backend_used: BackendId,
    pub chain: Vec<FallbackAttempt>,
}

/// Error type for fallback execution
#[derive(Debug, Error)]
pub enum FallbackError {
    /// Nothing to try. Returned before any work is attempted.
    #[error("no backends available")]
    NoBackendsAvailable,

    /// Every candidate was exhausted; carries the most recent failure.
    #[error("all backends exhausted: {last_error}")]
    Exhausted {
        last_error: String,
        chain: Vec<FallbackAttempt>,
    },
}

impl FallbackError {
    /// The attempt chain, empty when no work was ever attempted.
    pub fn chain(&self) -> &[FallbackAttempt] {
        match self {
            FallbackError::NoBackendsAvailable => &[],
            FallbackError::Exhausted { chain, .. } => chain,
        }
    }
}

/// Drives a unit of work across the ranked backend list.
pub struct FallbackExecutor {
    selector: Arc<ModelSelector>,
    registry: Arc<BackendRegistry>,
    policy: BackoffPolicy,
}

impl FallbackExecutor {
    pub fn new(
        selector: Arc<ModelSelector>,
        registry: Arc<BackendRegistry>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            selector,
            registry,
            policy,
        }
    }

    /// Candidate backends for `task`, best first. An available user
    /// preference is moved to the front regardless of its score.
    async fn candidates(
        &self,
        task: TaskType,
        user_preference: Option<BackendId>,
    ) -> Vec<BackendId> {
        let ranked = self.selector.rank(task).await;
        let mut candidates: Vec<BackendId> = ranked
            .iter()
            .filter(|r| r.available)
            .map(|r| r.backend)
            .collect();

        if let Some(preferred) = user_preference {
            if let Some(pos) = candidates.iter().position(|id| *id == preferred) {
                let id = candidates.remove(pos);
                candidates.insert(0, id);
            }
        }

        candidates
    }

    /// Run `work` against each candidate in order, with up to
    /// `max_retries_per_backend` tries per candidate and exponential backoff
    /// between same-backend retries.
    ///
    /// A `max_retries_per_backend` of 1 means no retry, only fallback.
    pub async fn execute<T, F, Fut>(
        &self,
        task: TaskType,
        user_preference: Option<BackendId>,
        max_retries_per_backend: u32,
        work: F,
    ) -> Result<FallbackSuccess<T>, FallbackError>
    where
        T: Send,
        F: Fn(Arc<dyn BackendClient>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, BackendError>> + Send,
    {
        let candidates = self.candidates(task, user_preference).await;
        if candidates.is_empty() {
            return Err(FallbackError::NoBackendsAvailable);
        }

        let retries = max_retries_per_backend.max(1);
        let mut chain: Vec<FallbackAttempt> = Vec::new();
        let mut last_error = String::from("no attempts made");

        for backend in candidates {
            let client = match self.registry.get_client(backend).await {
                Ok(client) => client,
                Err(e) => {
                    // Availability changed between ranking and execution.
                    warn!(backend = %backend, error = %e, "skipping candidate, client unavailable");
                    last_error = e.to_string();
                    continue;
                }
            };

            'attempts: for attempt in 1..=retries {
                let started = Instant::now();
                match work(client.clone()).await {
                    Ok(result) => {
                        chain.push(FallbackAttempt {
                            backend,
                            attempt,
                            outcome: AttemptOutcome::Success,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                        debug!(backend = %backend, attempt, "fallback work succeeded");
                        return Ok(FallbackSuccess {
                            result,
                            backend_used: backend,
                            chain,
                        });
                    }
                    Err(err) => {
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        last_error = err.to_string();

                        if err.is_rate_limit() {
                            // The backend told us to go away; retrying it
                            // now would only burn the window.
                            chain.push(FallbackAttempt {
                                backend,
                                attempt,
                                outcome: AttemptOutcome::RateLimited,
                                elapsed_ms,
                            });
                            warn!(backend = %backend, attempt, "rate limited, moving to next backend");
                            break 'attempts;
                        }

                        if err.is_fatal() {
                            chain.push(FallbackAttempt {
                                backend,
                                attempt,
                                outcome: AttemptOutcome::Fatal,
                                elapsed_ms,
                            });
                            warn!(backend = %backend, attempt, error = %err, "fatal backend error, moving to next backend");
                            break 'attempts;
                        }

                        chain.push(FallbackAttempt {
                            backend,
                            attempt,
                            outcome: AttemptOutcome::TransientFailure,
                            elapsed_ms,
                        });
                        debug!(backend = %backend, attempt, error = %err, "transient backend failure");

                        if attempt < retries {
                            sleep(self.policy.delay_for_attempt(attempt)).await;
                        }
                    }
                }
            }
        }

        Err(FallbackError::Exhausted { last_error, chain })
    }
}
