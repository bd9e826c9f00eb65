//! Rate limiting module
//!
//! Decides per request whether a caller may proceed, based on a counter kept
//! in a shared store and keyed by the caller's identity:
//!
//! - a non-empty API token, limited by `token_limit`, or otherwise
//! - the client address, limited by `ip_limit`.
//!
//! Every admitted request increments the identity's counter and refreshes its
//! expiry to the configured window, so the window slides with activity: a
//! client's quota resets one full window after its last admitted request.
//! Rejected requests leave the counter untouched.
//!
//! # Backends
//!
//! - **Redis** ([`RedisCounterStore`]): shared by every replica, so limits
//!   hold cluster-wide.
//! - **Memory** ([`MemoryCounterStore`]): per-process, for single instances
//!   and tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use admission_guard::rate_limit::{
//!     IdentitySignals, MemoryCounterStore, RateLimitPolicy, RateLimiter,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = RateLimitPolicy::new(5, 10, Duration::from_secs(10));
//!     let limiter = RateLimiter::new(policy, Arc::new(MemoryCounterStore::new()));
//!
//!     let signals = IdentitySignals {
//!         forwarded_for: None,
//!         remote_addr: "192.168.1.1:51234",
//!         token: None,
//!     };
//!     let decision = limiter.evaluate(&signals, None).await.unwrap();
//!     assert!(decision.allowed);
//!
//!     // Or share counters across replicas through Redis
//!     // let store = RedisCounterStore::connect("localhost:6379").await.unwrap();
//! }
//! ```

pub mod local;
pub mod lua_scripts;
pub mod middleware;
pub mod redis;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use local::MemoryCounterStore;
pub use middleware::{add_rate_limit_headers, admission_middleware, AdmissionLayerState};
pub use self::redis::RedisCounterStore;
pub use service::RateLimiter;
pub use store::CounterStore;
pub use types::{
    AdmissionStrategy, Decision, IdentityKey, IdentityKind, IdentitySignals, RateLimitPolicy,
};
