use super::store::CounterStore;
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A live counter and the instant it stops counting
#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

impl Counter {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

fn expiry(now: Instant, ttl: Duration) -> Result<Instant> {
    now.checked_add(ttl).ok_or_else(|| {
        GuardError::Config(format!("Counter TTL of {:?} is out of range", ttl))
    })
}

/// Local (in-memory) counter store.
///
/// Same semantics as the Redis store, but counters are private to this
/// process, so limits are enforced per instance rather than cluster-wide.
/// Expired counters are dropped lazily; call [`purge_expired`](Self::purge_expired)
/// periodically in long-running processes.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, Counter>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired counter, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.is_live(now));
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            debug!(removed, "Purged expired counters");
        }
        removed
    }

    /// Number of stored counters, expired ones included until purged
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get_count(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|counter| counter.is_live(now))
            .map(|counter| counter.count)
            .unwrap_or(0))
    }

    async fn increment_and_refresh(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let expires_at = expiry(now, ttl)?;
        let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now,
        });

        if !counter.is_live(now) {
            counter.count = 0;
        }
        counter.count += 1;
        counter.expires_at = expires_at;

        debug!(key = %key, count = counter.count, "Counter incremented");
        Ok(())
    }

    async fn increment_if_below(
        &self,
        key: &str,
        limit: u64,
        ttl: Duration,
    ) -> Result<Option<u64>> {
        let now = Instant::now();
        let expires_at = expiry(now, ttl)?;

        // The entry guard holds the shard lock, making compare and increment one step
        match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let counter = occupied.get_mut();
                let current = if counter.is_live(now) { counter.count } else { 0 };
                if current >= limit {
                    return Ok(None);
                }
                counter.count = current + 1;
                counter.expires_at = expires_at;
                Ok(Some(counter.count))
            }
            Entry::Vacant(vacant) => {
                // Rejections on a fresh key leave nothing behind
                if limit == 0 {
                    return Ok(None);
                }
                vacant.insert(Counter {
                    count: 1,
                    expires_at,
                });
                Ok(Some(1))
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
