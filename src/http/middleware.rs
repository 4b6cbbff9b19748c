//! Per-client rate limiting for the HTTP surface.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use super::error::ApiError;
use super::AppState;
use crate::ratelimit::{QuotaReport, RateLimitError};
use crate::security::{client_address, hash_identifier};

/// Paths never counted against a client's quota.
const EXEMPT_PATHS: [&str; 3] = ["/", "/health", "/api/v1/chat/quota"];
const EXEMPT_PREFIX: &str = "/api/v1/health";

fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path) || path.starts_with(EXEMPT_PREFIX)
}

/// Hashed identifier for the client that sent `request`.
pub(crate) fn identify(request: &Request, secret: &str) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    hash_identifier(&client_address(request.headers(), peer), secret)
}

/// Admit or reject the request, then annotate the response with quota headers.
///
/// Only the admission check counts as a limiter call. The header lookup peeks
/// at the backend that made the decision. It never advances the recovery probe
/// cadence and never probes for recovery.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let identifier = identify(&request, &state.config.secret_key);
    if let Err(err) = state.limiter.check(&identifier).await {
        if let RateLimitError::LimitExceeded(denial) = &err {
            warn!(
                identifier = %identifier,
                window = %denial.window,
                limit = denial.limit,
                "Rate limit exceeded"
            );
        }
        return ApiError::from(err).into_response();
    }

    let mut response = next.run(request).await;

    match state.limiter.peek_quota(&identifier).await {
        Ok(quota) => {
            let headers = response.headers_mut();
            for (name, value) in QuotaReport::from(quota).headers() {
                if let Ok(value) = HeaderValue::from_str(&value) {
                    headers.insert(HeaderName::from_static(name), value);
                }
            }
        }
        Err(e) => debug!(error = %e, "Skipping rate limit headers"),
    }

    response
}
