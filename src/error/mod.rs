use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Result type for admission guard operations
pub type Result<T> = std::result::Result<T, GuardError>;

/// Admission guard error types
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// The counter store could not be reached or returned an unexpected reply
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    /// The request deadline passed before the store round trip completed
    #[error("Rate limit check cancelled before the counter store replied")]
    Cancelled,

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuardError {
    /// Get the HTTP status code for this error.
    ///
    /// Store failures and cancellations reject the request with 429: when the
    /// quota ledger cannot be consulted the caller is treated as exhausted.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GuardError::StoreUnavailable(_) => StatusCode::TOO_MANY_REQUESTS,
            GuardError::Cancelled => StatusCode::TOO_MANY_REQUESTS,
            GuardError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GuardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GuardError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::Config(_) => "config",
            GuardError::StoreUnavailable(_) => "store_unavailable",
            GuardError::Cancelled => "cancelled",
            GuardError::Internal(_) => "internal",
            GuardError::Io(_) => "io",
        }
    }
}

impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        GuardError::StoreUnavailable(err.to_string())
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GuardError::StoreUnavailable("connection refused".to_string()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GuardError::Cancelled.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GuardError::Config("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_display() {
        let err = GuardError::StoreUnavailable("connection refused".to_string());
        assert_eq!(
            err.to_string(),
            "Counter store unavailable: connection refused"
        );
        assert_eq!(err.kind(), "store_unavailable");
    }

    #[test]
    fn test_redis_error_maps_to_store_unavailable() {
        let redis_err = redis::RedisError::from((redis::ErrorKind::IoError, "broken pipe"));
        let err: GuardError = redis_err.into();
        assert!(matches!(err, GuardError::StoreUnavailable(_)));
    }

    #[test]
    fn test_into_response_is_plain_text() {
        let response = GuardError::Cancelled.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    }
}
