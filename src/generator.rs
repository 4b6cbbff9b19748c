//! Response generation through an external language-model API.
//!
//! The gateway only needs [`ResponseGenerator`]; [`GeminiClient`] is the
//! production implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";
const REQUEST_TIMEOUT_SECS: u64 = 60;
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Only the most recent context messages are forwarded.
const CONTEXT_WINDOW: usize = 5;

const DEFAULT_SYSTEM_PROMPT: &str = "You are the assistant on a personal portfolio site. \
Answer visitors' questions about the site owner's skills, experience and projects \
politely and accurately, handle technical questions, and keep a professional, friendly tone.";

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("failed to build HTTP client: {0}")]
    HttpClientBuild(String),
    #[error("generator request failed: {0}")]
    Request(String),
    #[error("generator returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generator returned an empty response")]
    EmptyResponse,
}

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One earlier turn supplied by the client as context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

/// Produces a reply for a user message.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(
        &self,
        message: &str,
        context: &[ChatMessage],
    ) -> Result<String, GeneratorError>;
}

/// Assemble the single-text prompt sent to the model.
pub fn build_prompt(system_prompt: &str, context: &[ChatMessage], message: &str) -> String {
    let mut parts = vec![system_prompt.to_string()];
    let skip = context.len().saturating_sub(CONTEXT_WINDOW);
    for turn in &context[skip..] {
        let prefix = match turn.role {
            Role::User => "User:",
            Role::Assistant => "Assistant:",
        };
        parts.push(format!("{} {}", prefix, turn.content));
    }
    parts.push(format!("User: {}", message));
    parts.push("Assistant:".to_string());
    parts.join("\n\n")
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    system_prompt: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String) -> Result<Self, GeneratorError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| GeneratorError::HttpClientBuild(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            model,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str) -> Value {
        let safety: Vec<Value> = HARM_CATEGORIES
            .iter()
            .map(|c| json!({ "category": c, "threshold": "BLOCK_MEDIUM_AND_ABOVE" }))
            .collect();
        json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0.7,
                "topP": 0.8,
                "topK": 40,
                "maxOutputTokens": 1024
            },
            "safetySettings": safety
        })
    }
}

#[async_trait]
impl ResponseGenerator for GeminiClient {
    async fn generate(
        &self,
        message: &str,
        context: &[ChatMessage],
    ) -> Result<String, GeneratorError> {
        let prompt = build_prompt(&self.system_prompt, context, message);
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, prompt_chars = prompt.len(), "Requesting generation");

        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(&self.request_body(&prompt))
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(request_error)?;
        if !(200..300).contains(&status) {
            error!(status = status, "Generator request rejected");
            return Err(GeneratorError::Status { status, body: text });
        }

        parse_response(&text)
    }
}

/// Error text never carries the request URL.
fn request_error(err: reqwest::Error) -> GeneratorError {
    GeneratorError::Request(err.without_url().to_string())
}

/// Extract the reply text from a `generateContent` response body.
fn parse_response(body: &str) -> Result<String, GeneratorError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| GeneratorError::Request(e.to_string()))?;
    let text: String = value["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(GeneratorError::EmptyResponse);
    }
    Ok(text.to_string())
}
