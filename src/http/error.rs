//! Mapping of gateway failures onto HTTP responses.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::ratelimit::{Denial, RateLimitError};

/// Error returned by handlers and the rate-limit middleware.
#[derive(Debug)]
pub enum ApiError {
    /// Request failed validation.
    BadRequest(String),
    /// Caller exceeded its quota.
    RateLimited(Denial),
    /// The rate limiter could not render a decision.
    LimiterUnavailable(String),
    /// A downstream dependency is unavailable.
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::LimiterUnavailable(_) | ApiError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "Invalid request",
            ApiError::RateLimited(_) => "Rate limit exceeded",
            ApiError::LimiterUnavailable(_) => "Rate limiter unavailable",
            ApiError::Unavailable(_) => "Service unavailable",
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::RateLimited(denial) => denial.to_string(),
            ApiError::BadRequest(msg)
            | ApiError::LimiterUnavailable(msg)
            | ApiError::Unavailable(msg) => msg.clone(),
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(err: RateLimitError) -> Self {
        match err {
            RateLimitError::LimitExceeded(denial) => ApiError::RateLimited(denial),
            RateLimitError::ServiceUnavailable(reason) => ApiError::LimiterUnavailable(reason),
        }
    }
}

/// Whole seconds until retry, rounded up and never zero.
pub(crate) fn retry_after_secs(denial: &Denial) -> u64 {
    let secs = denial.retry_after.as_secs() + u64::from(denial.retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.label(), "detail": self.detail() }));

        match &self {
            ApiError::RateLimited(denial) => {
                let retry_after = retry_after_secs(denial);
                (
                    status,
                    [(header::RETRY_AFTER, retry_after.to_string())],
                    body,
                )
                    .into_response()
            }
            ApiError::LimiterUnavailable(reason) => {
                error!(error = %reason, "Refusing request, rate limiter unavailable");
                (status, body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::TimeWindow;
    use std::time::Duration;

    fn denial(retry_after: Duration) -> Denial {
        Denial {
            window: TimeWindow::Minute,
            limit: 10,
            retry_after,
            degraded: false,
        }
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(&denial(Duration::from_millis(12_300))), 13);
        assert_eq!(retry_after_secs(&denial(Duration::from_secs(40))), 40);
        assert_eq!(retry_after_secs(&denial(Duration::ZERO)), 1);
    }

    #[test]
    fn test_limit_exceeded_maps_to_429() {
        let err: ApiError =
            RateLimitError::LimitExceeded(denial(Duration::from_secs(30))).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    }

    #[test]
    fn test_limiter_failure_fails_closed() {
        let err: ApiError = RateLimitError::ServiceUnavailable("boom".to_string()).into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.label(), "Rate limiter unavailable");
    }
}
