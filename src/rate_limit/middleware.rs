use super::service::RateLimiter;
use super::types::{Decision, IdentitySignals, UNKNOWN_CLIENT};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Admission middleware state
#[derive(Clone)]
pub struct AdmissionLayerState {
    /// The decision engine
    limiter: Arc<RateLimiter>,
    /// Header carrying the client token
    token_header: HeaderName,
    /// Header carrying the proxy-supplied client address list
    forwarded_header: HeaderName,
    /// Upper bound on a single admission check
    check_timeout: Option<Duration>,
    /// Whether to attach `X-RateLimit-*` headers
    expose_headers: bool,
}

impl AdmissionLayerState {
    /// Create middleware state with the default `API_KEY` and
    /// `X-Forwarded-For` headers
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            token_header: HeaderName::from_static("api_key"),
            forwarded_header: HeaderName::from_static("x-forwarded-for"),
            check_timeout: None,
            expose_headers: true,
        }
    }

    pub fn with_token_header(mut self, header: HeaderName) -> Self {
        self.token_header = header;
        self
    }

    pub fn with_forwarded_header(mut self, header: HeaderName) -> Self {
        self.forwarded_header = header;
        self
    }

    /// Abandon store round trips that outlive `timeout`
    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = Some(timeout);
        self
    }

    pub fn with_expose_headers(mut self, expose: bool) -> Self {
        self.expose_headers = expose;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Axum middleware function for request admission.
///
/// Admitted requests continue to the next handler. A rejection, a store
/// failure or a cancelled check all answer 429 with a plain-text reason: an
/// unreachable store never lets traffic through.
pub async fn admission_middleware(
    State(state): State<AdmissionLayerState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let remote_addr = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());
    // A deadline past the clock's range is no deadline at all
    let deadline = state
        .check_timeout
        .and_then(|timeout| Instant::now().checked_add(timeout));

    let outcome = {
        let headers = request.headers();
        let signals = IdentitySignals {
            forwarded_for: header_str(headers, &state.forwarded_header),
            remote_addr: &remote_addr,
            token: header_str(headers, &state.token_header),
        };
        state.limiter.evaluate(&signals, deadline).await
    };

    match outcome {
        Ok(decision) if decision.allowed => {
            debug!(path = %request.uri().path(), "Request admitted");
            let response = next.run(request).await;
            if state.expose_headers {
                add_rate_limit_headers(response, &decision)
            } else {
                response
            }
        }
        Ok(decision) => {
            let response = create_rate_limit_response(&decision);
            if state.expose_headers {
                add_rate_limit_headers(response, &decision)
            } else {
                response
            }
        }
        Err(e) => e.into_response(),
    }
}

/// Create a 429 Too Many Requests response for a rejected decision
fn create_rate_limit_response(decision: &Decision) -> Response {
    let reason = decision.reason().unwrap_or_default();
    (StatusCode::TOO_MANY_REQUESTS, reason).into_response()
}

/// Attach `X-RateLimit-Limit` and `X-RateLimit-Remaining` to a response
pub fn add_rate_limit_headers(mut response: Response, decision: &Decision) -> Response {
    let headers = response.headers_mut();

    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining()));

    response
}
