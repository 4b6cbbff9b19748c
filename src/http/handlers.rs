//! Route handlers.

use axum::extract::{Request, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::error::ApiError;
use super::middleware::identify;
use super::AppState;
use crate::generator::ChatMessage;
use crate::ratelimit::{Mode, QuotaReport};
use crate::security::{is_content_safe, new_session_id, sanitize_input};

const SERVICE_NAME: &str = "llm-gateway";
const MAX_MESSAGE_CHARS: usize = 2000;
const MAX_SESSION_ID_CHARS: usize = 100;

pub(crate) const SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-id");

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: Vec<ChatMessage>,
}

impl ChatRequest {
    fn validate(&self) -> Result<(), ApiError> {
        let len = self.message.trim().chars().count();
        if len == 0 {
            return Err(ApiError::BadRequest("Message cannot be empty".to_string()));
        }
        if len > MAX_MESSAGE_CHARS {
            return Err(ApiError::BadRequest(format!(
                "Message cannot exceed {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
        if let Some(session_id) = &self.session_id {
            if session_id.chars().count() > MAX_SESSION_ID_CHARS {
                return Err(ApiError::BadRequest(format!(
                    "Session id cannot exceed {} characters",
                    MAX_SESSION_ID_CHARS
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub message: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: &'static str,
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let limiter = state.limiter.status();
    let status = match limiter.mode {
        Mode::Primary => "healthy",
        Mode::Degraded => "degraded",
    };
    Json(json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "timestamp": Utc::now(),
        "rate_limiter": limiter,
    }))
}

pub async fn ready(State(state): State<AppState>) -> Response {
    let shared_store = state.limiter.probe().await;
    let generator = state.generator.is_some();
    let ready = shared_store && generator;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "checks": {
            "shared_store": shared_store,
            "generator": generator,
        },
        "timestamp": Utc::now(),
    });
    (status, Json(body)).into_response()
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;

    let message = sanitize_input(&request.message);
    if message.is_empty() {
        return Err(ApiError::BadRequest(
            "Message is empty after sanitization".to_string(),
        ));
    }
    if !is_content_safe(&message) {
        warn!("Rejected chat message with unsafe content");
        return Err(ApiError::BadRequest(
            "Message contains potentially unsafe content".to_string(),
        ));
    }

    let generator = state
        .generator
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Chat service is not configured".to_string()))?;

    let session_id = request.session_id.unwrap_or_else(new_session_id);
    let reply = generator
        .generate(&message, &request.context)
        .await
        .map_err(|e| {
            error!(error = %e, session_id = %session_id, "Response generation failed");
            let detail = if state.config.debug {
                e.to_string()
            } else {
                "The assistant is temporarily unavailable".to_string()
            };
            ApiError::Unavailable(detail)
        })?;

    info!(session_id = %session_id, reply_chars = reply.len(), "Chat reply generated");

    let body = ChatResponse {
        message: reply,
        session_id: session_id.clone(),
        timestamp: Utc::now(),
        status: "success",
    };
    Ok(([(SESSION_HEADER, session_id)], Json(body)).into_response())
}

pub async fn quota(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let identifier = identify(&request, &state.config.secret_key);
    let quota = state.limiter.quota(&identifier).await?;
    let body = json!({
        "quota": QuotaReport::from(quota),
        "status": "success",
    });
    Ok(Json(body).into_response())
}
