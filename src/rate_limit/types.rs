use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Prefix for every counter key written to the store
pub const KEY_PREFIX: &str = "rate_limit:";

/// Message returned to callers whose quota is exhausted
pub const LIMIT_EXCEEDED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Identity used when the HTTP layer knows nothing about the peer
pub const UNKNOWN_CLIENT: &str = "unknown";

/// What kind of identity a request is being limited by
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// Client address (forwarded header or socket peer)
    Ip,
    /// Client-supplied API token
    Token,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Ip => "ip",
            IdentityKind::Token => "token",
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the limiter consults the counter store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStrategy {
    /// Read the count, then increment when below the limit.
    ///
    /// Concurrent requests for one identity can all observe a count below
    /// the limit, so the admitted total may overshoot by up to the number of
    /// racing requests minus one.
    #[default]
    ReadThenIncrement,
    /// Compare and increment in one store-side step. Never overshoots.
    Atomic,
}

/// Immutable rate limit policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Maximum requests per window for IP-keyed identities
    pub ip_limit: u32,
    /// Maximum requests per window for token-keyed identities
    pub token_limit: u32,
    /// Expiry applied to a counter on every admitted request
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(ip_limit: u32, token_limit: u32, window: Duration) -> Self {
        Self {
            ip_limit,
            token_limit,
            window,
        }
    }

    /// Limit that applies to the given identity kind
    pub fn limit_for(&self, kind: IdentityKind) -> u32 {
        match kind {
            IdentityKind::Ip => self.ip_limit,
            IdentityKind::Token => self.token_limit,
        }
    }
}

/// Identity a single request is rate limited by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub kind: IdentityKind,
    pub identifier: String,
}

impl IdentityKey {
    pub fn new(kind: IdentityKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
        }
    }

    /// Namespaced key under which the counter lives in the store.
    ///
    /// Tokens and addresses share one namespace, matching the layout other
    /// consumers of the store already expect.
    pub fn store_key(&self) -> String {
        format!("{}{}", KEY_PREFIX, self.identifier)
    }
}

/// Raw identity signals carried by one request
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySignals<'a> {
    /// Value of the forwarded-for header, if any
    pub forwarded_for: Option<&'a str>,
    /// Raw remote socket address, e.g. `10.0.0.7:51234`
    pub remote_addr: &'a str,
    /// Client-supplied token, if any
    pub token: Option<&'a str>,
}

impl<'a> IdentitySignals<'a> {
    /// Client address for this request.
    ///
    /// The leftmost forwarded-for entry wins and is taken verbatim. Without
    /// one, the host part of the remote socket address is used.
    pub fn client_address(&self) -> &'a str {
        match self.forwarded_for {
            Some(forwarded) if !forwarded.is_empty() => {
                forwarded.split(',').next().unwrap_or(forwarded)
            }
            _ => host_of(self.remote_addr),
        }
    }

    /// Resolve the identity this request is limited by.
    ///
    /// A non-empty token always takes precedence over the client address.
    pub fn identity(&self) -> IdentityKey {
        match self.token {
            Some(token) if !token.is_empty() => IdentityKey::new(IdentityKind::Token, token),
            _ => IdentityKey::new(IdentityKind::Ip, self.client_address()),
        }
    }
}

/// Strip a trailing `:port` from a socket address string
fn host_of(remote_addr: &str) -> &str {
    if remote_addr.parse::<SocketAddr>().is_ok() {
        if let Some(rest) = remote_addr.strip_prefix('[') {
            // [v6]:port
            if let Some((host, _)) = rest.split_once(']') {
                return host;
            }
        }
    }

    match remote_addr.rsplit_once(':') {
        // A bare IPv6 address has several colons and no port
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => remote_addr,
    }
}

/// Outcome of one admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Kind of identity the decision was made for
    pub kind: IdentityKind,
    /// Limit that applied
    pub limit: u32,
    /// Counter value after this decision
    pub count: u64,
}

impl Decision {
    pub fn admitted(kind: IdentityKind, limit: u32, count: u64) -> Self {
        Self {
            allowed: true,
            kind,
            limit,
            count,
        }
    }

    pub fn rejected(kind: IdentityKind, limit: u32, count: u64) -> Self {
        Self {
            allowed: false,
            kind,
            limit,
            count,
        }
    }

    /// Requests left in the current window
    pub fn remaining(&self) -> u64 {
        u64::from(self.limit).saturating_sub(self.count)
    }

    /// Human-readable reason for a rejection
    pub fn reason(&self) -> Option<&'static str> {
        if self.allowed {
            None
        } else {
            Some(LIMIT_EXCEEDED_MESSAGE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_key_is_namespaced() {
        let key = IdentityKey::new(IdentityKind::Ip, "192.168.1.1");
        assert_eq!(key.store_key(), "rate_limit:192.168.1.1");

        let key = IdentityKey::new(IdentityKind::Token, "abc123");
        assert_eq!(key.store_key(), "rate_limit:abc123");
    }

    #[test]
    fn test_client_address_prefers_forwarded_for() {
        let signals = IdentitySignals {
            forwarded_for: Some("203.0.113.9, 10.0.0.1"),
            remote_addr: "10.0.0.2:4000",
            token: None,
        };
        assert_eq!(signals.client_address(), "203.0.113.9");
    }

    #[test]
    fn test_forwarded_for_taken_verbatim() {
        let signals = IdentitySignals {
            forwarded_for: Some("192.168.1.1:8080"),
            remote_addr: "10.0.0.2:4000",
            token: None,
        };
        assert_eq!(signals.client_address(), "192.168.1.1:8080");

        let signals = IdentitySignals {
            forwarded_for: Some("not-an-address"),
            remote_addr: "10.0.0.2:4000",
            token: None,
        };
        assert_eq!(signals.client_address(), "not-an-address");
    }

    #[test]
    fn test_empty_forwarded_for_falls_back_to_remote() {
        let signals = IdentitySignals {
            forwarded_for: Some(""),
            remote_addr: "10.0.0.2:4000",
            token: None,
        };
        assert_eq!(signals.client_address(), "10.0.0.2");
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("192.168.1.1:8080"), "192.168.1.1");
        assert_eq!(host_of("[::1]:8080"), "::1");
        assert_eq!(host_of("::1"), "::1");
        assert_eq!(host_of("192.168.1.1"), "192.168.1.1");
        assert_eq!(host_of("unknown"), "unknown");
    }

    #[test]
    fn test_token_overrides_address() {
        let signals = IdentitySignals {
            forwarded_for: Some("192.168.1.3"),
            remote_addr: "10.0.0.2:4000",
            token: Some("abc123"),
        };
        let identity = signals.identity();
        assert_eq!(identity.kind, IdentityKind::Token);
        assert_eq!(identity.identifier, "abc123");
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let signals = IdentitySignals {
            forwarded_for: None,
            remote_addr: "10.0.0.2:4000",
            token: Some(""),
        };
        let identity = signals.identity();
        assert_eq!(identity.kind, IdentityKind::Ip);
        assert_eq!(identity.identifier, "10.0.0.2");
    }

    #[test]
    fn test_policy_limit_for() {
        let policy = RateLimitPolicy::new(5, 10, Duration::from_secs(10));
        assert_eq!(policy.limit_for(IdentityKind::Ip), 5);
        assert_eq!(policy.limit_for(IdentityKind::Token), 10);
    }

    #[test]
    fn test_decision() {
        let admitted = Decision::admitted(IdentityKind::Ip, 5, 3);
        assert!(admitted.allowed);
        assert_eq!(admitted.remaining(), 2);
        assert!(admitted.reason().is_none());

        let rejected = Decision::rejected(IdentityKind::Token, 10, 10);
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining(), 0);
        assert_eq!(rejected.reason(), Some(LIMIT_EXCEEDED_MESSAGE));
    }

    #[test]
    fn test_strategy_deserialize() {
        let strategy: AdmissionStrategy = serde_yaml::from_str("atomic").unwrap();
        assert_eq!(strategy, AdmissionStrategy::Atomic);
        let strategy: AdmissionStrategy = serde_yaml::from_str("read_then_increment").unwrap();
        assert_eq!(strategy, AdmissionStrategy::ReadThenIncrement);
    }
}
