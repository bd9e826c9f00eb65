//! Counter store abstraction shared by the Redis and in-memory backends.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A shared counter keyed by string with per-key expiry.
///
/// Implementations perform I/O only; all policy lives in
/// [`RateLimiter`](super::RateLimiter). Every failure other than "key
/// absent" surfaces as [`GuardError::StoreUnavailable`](crate::error::GuardError).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for `key`, or 0 when the key is absent or expired.
    /// Never creates the key.
    async fn get_count(&self, key: &str) -> Result<u64>;

    /// Increment `key` by one (creating it at 1), then set its expiry to `ttl`.
    ///
    /// The increment and the expiry are two separate store operations. If the
    /// second one fails the counter keeps its previous expiry, or none at all
    /// when it was just created.
    async fn increment_and_refresh(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Atomically increment `key` and refresh its expiry if its count is
    /// below `limit`. Returns the new count, or `None` when the key was
    /// already at or above `limit` and was left untouched.
    async fn increment_if_below(&self, key: &str, limit: u64, ttl: Duration)
        -> Result<Option<u64>>;

    /// Check that the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}
