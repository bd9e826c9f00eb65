pub mod config;
pub mod error;
pub mod metrics;
pub mod rate_limit;

use crate::config::{GuardConfig, LogFormat, LoggingConfig, StoreBackend};
use crate::error::{GuardError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use crate::rate_limit::{
    admission_middleware, AdmissionLayerState, CounterStore, MemoryCounterStore,
    RateLimiter, RedisCounterStore,
};
use axum::{middleware, routing::get, Router as AxumRouter};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Build the admission middleware state described by `config` on top of `store`
pub fn build_admission_state(
    config: &GuardConfig,
    store: Arc<dyn CounterStore>,
) -> Result<AdmissionLayerState> {
    let limiter = RateLimiter::new(config.rate_limit.policy(), store)
        .with_strategy(config.rate_limit.strategy);

    let mut state = AdmissionLayerState::new(Arc::new(limiter))
        .with_token_header(config.rate_limit.token_header_name()?)
        .with_forwarded_header(config.rate_limit.forwarded_header_name()?)
        .with_expose_headers(config.rate_limit.expose_headers);

    if let Some(timeout) = config.server.request_timeout() {
        state = state.with_check_timeout(timeout);
    }

    Ok(state)
}

/// Build the HTTP application: guarded downstream routes plus an optional
/// metrics endpoint that bypasses admission.
pub fn build_app(
    admission: AdmissionLayerState,
    metrics: Option<(String, MetricsService)>,
) -> AxumRouter {
    let guarded = AxumRouter::new()
        .route("/", get(downstream_handler))
        .layer(middleware::from_fn_with_state(admission, admission_middleware));

    let app = match metrics {
        Some((path, service)) => guarded.merge(
            AxumRouter::new()
                .route(&path, get(metrics_handler))
                .with_state(service),
        ),
        None => guarded,
    };

    app.layer(TraceLayer::new_for_http())
}

/// Placeholder for the protected service
async fn downstream_handler() -> &'static str {
    "OK"
}

/// Connect the configured counter store
async fn connect_store(config: &GuardConfig) -> Result<Arc<dyn CounterStore>> {
    match config.store.backend {
        StoreBackend::Redis => {
            let store: Arc<dyn CounterStore> =
                Arc::new(RedisCounterStore::connect(&config.store.address).await?);
            Ok(store)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory counter store: limits apply per instance only");
            let store = Arc::new(MemoryCounterStore::new());

            let sweeper = store.clone();
            let period = config.rate_limit.window();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    sweeper.purge_expired();
                }
            });

            let store: Arc<dyn CounterStore> = store;
            Ok(store)
        }
    }
}

/// Initialize the admission guard server
pub async fn init_guard(config: GuardConfig) -> Result<()> {
    // Validate configuration
    config.validate()?;

    info!("Starting admission guard");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let store = connect_store(&config).await?;
    match store.ping().await {
        Ok(()) => info!(store = store.name(), "Counter store reachable"),
        Err(e) => warn!(
            store = store.name(),
            error = %e,
            "Counter store ping failed, requests will be rejected until it recovers"
        ),
    }

    let admission = build_admission_state(&config, store)?;

    let metrics = if config.metrics.enabled {
        Some((config.metrics.path.clone(), MetricsService::new()?))
    } else {
        None
    };

    let app = build_app(admission, metrics);

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(GuardError::Io)?;

    info!("Admission guard ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| GuardError::Internal(format!("Server error: {}", e)))?;

    info!("Admission guard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize tracing/logging
pub fn init_tracing(logging: &LoggingConfig) {
    let default_filter = logging
        .filter
        .clone()
        .unwrap_or_else(|| "admission_guard=debug,tower_http=debug".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match logging.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init(),
    }
}
