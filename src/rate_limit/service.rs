use super::store::CounterStore;
use super::types::{AdmissionStrategy, Decision, IdentityKey, IdentitySignals, RateLimitPolicy};
use crate::error::{GuardError, Result};
use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Rate limiting decision engine.
///
/// Holds no per-identity state: every check is a fresh round trip to the
/// injected [`CounterStore`], which is the only shared mutable resource. No
/// retries are attempted; a single failed store call fails the evaluation.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: Arc<dyn CounterStore>,
    strategy: AdmissionStrategy,
}

impl RateLimiter {
    /// Create a rate limiter using the read-then-increment strategy
    pub fn new(policy: RateLimitPolicy, store: Arc<dyn CounterStore>) -> Self {
        info!(
            ip_limit = policy.ip_limit,
            token_limit = policy.token_limit,
            window_secs = policy.window.as_secs(),
            store = store.name(),
            "Initializing rate limiter"
        );
        Self {
            policy,
            store,
            strategy: AdmissionStrategy::default(),
        }
    }

    /// Switch the admission strategy
    pub fn with_strategy(mut self, strategy: AdmissionStrategy) -> Self {
        if strategy != self.strategy {
            info!(strategy = ?strategy, "Rate limiter strategy changed");
        }
        self.strategy = strategy;
        self
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn strategy(&self) -> AdmissionStrategy {
        self.strategy
    }

    /// Check whether the counter store is reachable
    pub async fn ping_store(&self) -> Result<()> {
        self.store.ping().await
    }

    /// Decide whether a request may proceed, recording the admission.
    ///
    /// When `deadline` passes while a store call is outstanding, the call is
    /// abandoned and [`GuardError::Cancelled`] is returned.
    pub async fn evaluate(
        &self,
        signals: &IdentitySignals<'_>,
        deadline: Option<Instant>,
    ) -> Result<Decision> {
        let identity = signals.identity();
        let result = match self.strategy {
            AdmissionStrategy::ReadThenIncrement => {
                self.read_then_increment(&identity, deadline).await
            }
            AdmissionStrategy::Atomic => self.increment_if_below(&identity, deadline).await,
        };

        match &result {
            Ok(decision) => {
                metrics::record_decision(decision.kind.as_str(), decision.allowed);
                if decision.allowed {
                    debug!(
                        identity = %identity.identifier,
                        kind = %identity.kind,
                        count = decision.count,
                        limit = decision.limit,
                        "Request admitted"
                    );
                } else {
                    warn!(
                        identity = %identity.identifier,
                        kind = %identity.kind,
                        limit = decision.limit,
                        "Rate limit exceeded"
                    );
                }
            }
            Err(e) => {
                metrics::record_store_error(e.kind());
                warn!(
                    identity = %identity.identifier,
                    kind = %identity.kind,
                    error = %e,
                    "Rate limit check failed, rejecting request"
                );
            }
        }

        result
    }

    /// Read the count, then increment when below the limit.
    ///
    /// Not atomic: concurrent requests may all pass the comparison.
    async fn read_then_increment(
        &self,
        identity: &IdentityKey,
        deadline: Option<Instant>,
    ) -> Result<Decision> {
        let limit = self.policy.limit_for(identity.kind);
        let key = identity.store_key();

        let count = within(deadline, self.store.get_count(&key)).await?;

        if count >= u64::from(limit) {
            // Rejections do not consume quota
            return Ok(Decision::rejected(identity.kind, limit, count));
        }

        within(
            deadline,
            self.store.increment_and_refresh(&key, self.policy.window),
        )
        .await?;

        Ok(Decision::admitted(identity.kind, limit, count + 1))
    }

    async fn increment_if_below(
        &self,
        identity: &IdentityKey,
        deadline: Option<Instant>,
    ) -> Result<Decision> {
        let limit = self.policy.limit_for(identity.kind);
        let key = identity.store_key();

        let incremented = within(
            deadline,
            self.store
                .increment_if_below(&key, u64::from(limit), self.policy.window),
        )
        .await?;

        Ok(match incremented {
            Some(count) => Decision::admitted(identity.kind, limit, count),
            None => Decision::rejected(identity.kind, limit, u64::from(limit)),
        })
    }
}

/// Race a store call against the caller's deadline
async fn within<T>(
    deadline: Option<Instant>,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, call)
            .await
            .map_err(|_| GuardError::Cancelled)?,
        None => call.await,
    }
}
