use crate::error::{GuardError, Result};
use crate::rate_limit::types::{AdmissionStrategy, RateLimitPolicy};
use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Longest accepted window or request timeout (one year)
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Main admission guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Quotas and identity headers
    pub rate_limit: RateLimitConfig,
    /// Counter store connection
    pub store: StoreConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus endpoint
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deadline for one admission check in seconds (0 disables it)
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

/// Rate limiting configuration. The limits and window have no defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window for a client address
    pub ip_limit: u32,
    /// Maximum requests per window for an API token
    pub token_limit: u32,
    /// Window length in seconds, refreshed on every admitted request
    pub window_secs: u64,
    /// How the counter store is consulted
    #[serde(default)]
    pub strategy: AdmissionStrategy,
    /// Header carrying the API token
    #[serde(default = "default_token_header")]
    pub token_header: String,
    /// Header carrying the proxy-supplied client address list
    #[serde(default = "default_forwarded_header")]
    pub forwarded_header: String,
    /// Attach `X-RateLimit-*` headers to responses
    #[serde(default = "default_true")]
    pub expose_headers: bool,
}

/// Counter store backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis instance (limits hold across replicas)
    #[default]
    Redis,
    /// Process-local counters
    Memory,
}

/// Counter store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Redis address, `host:port` or `redis://` URL
    #[serde(default)]
    pub address: String,
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default)]
    pub filter: Option<String>,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

/// Flat variables read from the process environment (or `.env`)
#[derive(Debug, Deserialize)]
struct EnvConfig {
    ip_limit: u32,
    token_limit: u32,
    expiration_time_in_seconds: u64,
    redis_url: String,
    #[serde(default)]
    port: Option<u16>,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_token_header() -> String {
    "API_KEY".to_string()
}

fn default_forwarded_header() -> String {
    "X-Forwarded-For".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl RateLimitConfig {
    /// Create a config with the given quotas and default headers
    pub fn new(ip_limit: u32, token_limit: u32, window_secs: u64) -> Self {
        Self {
            ip_limit,
            token_limit,
            window_secs,
            strategy: AdmissionStrategy::default(),
            token_header: default_token_header(),
            forwarded_header: default_forwarded_header(),
            expose_headers: default_true(),
        }
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Immutable policy handed to the rate limiter
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.ip_limit, self.token_limit, self.window())
    }

    pub fn token_header_name(&self) -> Result<HeaderName> {
        parse_header_name("token_header", &self.token_header)
    }

    pub fn forwarded_header_name(&self) -> Result<HeaderName> {
        parse_header_name("forwarded_header", &self.forwarded_header)
    }
}

fn parse_header_name(field: &str, value: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(value.as_bytes()).map_err(|e| {
        GuardError::Config(format!("Invalid {} '{}': {}", field, value, e))
    })
}

impl ServerConfig {
    /// Deadline for one admission check, if enabled
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl GuardConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GuardError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `IP_LIMIT`, `TOKEN_LIMIT`, `EXPIRATION_TIME_IN_SECONDS` and
    /// `REDIS_URL` (all required) plus an optional `PORT`.
    pub fn from_env() -> Result<Self> {
        Self::from_env_source(None)
    }

    fn from_env_source(source: Option<config::Map<String, String>>) -> Result<Self> {
        let env: EnvConfig = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true).source(source))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| {
                GuardError::Config(format!("Failed to load configuration from environment: {}", e))
            })?;

        let mut server = ServerConfig::default();
        if let Some(port) = env.port {
            server.port = port;
        }

        Ok(Self {
            server,
            rate_limit: RateLimitConfig::new(
                env.ip_limit,
                env.token_limit,
                env.expiration_time_in_seconds,
            ),
            store: StoreConfig {
                backend: StoreBackend::Redis,
                address: env.redis_url,
            },
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.window_secs == 0 {
            return Err(GuardError::Config(
                "Rate limit window must be > 0".to_string(),
            ));
        }

        if self.rate_limit.window_secs > MAX_DURATION_SECS {
            return Err(GuardError::Config(format!(
                "Rate limit window must be at most {} seconds, got {}",
                MAX_DURATION_SECS, self.rate_limit.window_secs
            )));
        }

        if self.server.request_timeout_secs > MAX_DURATION_SECS {
            return Err(GuardError::Config(format!(
                "Request timeout must be at most {} seconds, got {}",
                MAX_DURATION_SECS, self.server.request_timeout_secs
            )));
        }

        self.rate_limit.token_header_name()?;
        self.rate_limit.forwarded_header_name()?;

        if self.store.backend == StoreBackend::Redis && self.store.address.trim().is_empty() {
            return Err(GuardError::Config(
                "Redis store address cannot be empty".to_string(),
            ));
        }

        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(GuardError::Config(format!(
                "Metrics path must start with '/': {}",
                self.metrics.path
            )));
        }

        Ok(())
    }
}
