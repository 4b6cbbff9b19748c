//! HTTP surface of the gateway.
//!
//! Routes:
//!
//! - `GET /`, `GET /health`, `GET /api/v1/health`, `GET /api/v1/health/ready`
//! - `POST /api/v1/chat`
//! - `GET /api/v1/chat/quota`
//!
//! Every route except the health and quota endpoints passes through the
//! rate-limit middleware.

mod error;
mod handlers;
mod middleware;
mod server;

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::GatewayConfig;
use crate::generator::ResponseGenerator;
use crate::ratelimit::RateLimiter;

pub use error::ApiError;
pub use handlers::{ChatRequest, ChatResponse};
pub use server::HttpServer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub generator: Option<Arc<dyn ResponseGenerator>>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(
        limiter: Arc<RateLimiter>,
        generator: Option<Arc<dyn ResponseGenerator>>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            limiter,
            generator,
            config,
        }
    }
}

/// Build the application router with all middleware attached.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);
    let production = state.config.is_production();

    let app = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/health/ready", get(handlers::ready))
        .route("/api/v1/chat", post(handlers::chat))
        .route("/api/v1/chat/quota", get(handlers::quota))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    security_headers(app, production)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn security_headers(app: Router<AppState>, production: bool) -> Router<AppState> {
    let app = app
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'self'"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
        ));

    if production {
        app.layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ))
    } else {
        app
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderName::from_static("x-ratelimit-backend"),
            handlers::SESSION_HEADER,
        ])
}
