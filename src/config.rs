//! Configuration management for the gateway.
//!
//! Values come from an optional YAML file overlaid by environment variables
//! (`RATE_LIMIT_PER_MINUTE`, `REDIS_URL`, `SECRET_KEY`, ...). Keys match the
//! lowercase field names below.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::ratelimit::{Limits, DEFAULT_PROBE_INTERVAL};

/// Main configuration for the gateway service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Requests allowed per client per minute
    #[serde(default = "default_per_minute")]
    pub rate_limit_per_minute: u64,

    /// Requests allowed per client per hour
    #[serde(default = "default_per_hour")]
    pub rate_limit_per_hour: u64,

    /// Shared counter store endpoint
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Bound on each counter store round trip, in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub redis_timeout_ms: u64,

    /// Degraded calls between recovery probes
    #[serde(default = "default_probe_interval")]
    pub probe_interval: u64,

    /// Secret mixed into client identifier hashes
    #[serde(default)]
    pub secret_key: String,

    /// Origins allowed by CORS
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// API key for the response generator; chat is disabled without it
    #[serde(default)]
    pub gemini_api_key: Option<String>,

    /// Model used by the response generator
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    /// Deployment environment name
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Verbose error details in responses
    #[serde(default)]
    pub debug: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            rate_limit_per_minute: default_per_minute(),
            rate_limit_per_hour: default_per_hour(),
            redis_url: default_redis_url(),
            redis_timeout_ms: default_redis_timeout_ms(),
            probe_interval: default_probe_interval(),
            secret_key: String::new(),
            allowed_origins: Vec::new(),
            gemini_api_key: None,
            gemini_model: default_gemini_model(),
            environment: default_environment(),
            debug: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

fn default_per_minute() -> u64 {
    10
}

fn default_per_hour() -> u64 {
    100
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_timeout_ms() -> u64 {
    500
}

fn default_probe_interval() -> u64 {
    DEFAULT_PROBE_INTERVAL
}

fn default_gemini_model() -> String {
    "gemini-pro".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

impl GatewayConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::default()
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("allowed_origins"),
        );

        let config: GatewayConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file only.
    pub fn from_file(path: &str) -> Result<Self> {
        let config: GatewayConfig = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.secret_key.trim().is_empty() {
            return Err(GatewayError::Config("SECRET_KEY must be set".to_string()));
        }
        if self.rate_limit_per_minute == 0 || self.rate_limit_per_hour == 0 {
            return Err(GatewayError::Config(
                "rate limits must be greater than zero".to_string(),
            ));
        }
        if self.probe_interval == 0 {
            return Err(GatewayError::Config(
                "PROBE_INTERVAL must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Limits enforced while the shared store is healthy.
    pub fn limits(&self) -> Limits {
        Limits::new(self.rate_limit_per_minute, self.rate_limit_per_hour)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.limits(), Limits::new(10, 100));
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.probe_interval, 100);
        assert_eq!(config.redis_timeout(), Duration::from_millis(500));
        assert!(!config.is_production());
    }

    #[test]
    fn test_validate_requires_secret() {
        let config = GatewayConfig::default();
        assert!(matches!(config.validate(), Err(GatewayError::Config(_))));

        let config = GatewayConfig {
            secret_key: "s3cret".to_string(),
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = GatewayConfig {
            secret_key: "s3cret".to_string(),
            rate_limit_per_minute: 0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = GatewayConfig {
            secret_key: "s3cret".to_string(),
            probe_interval: 0,
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = std::env::temp_dir();
        file.push(format!("llm-gateway-config-{}.yaml", std::process::id()));
        {
            let mut f = std::fs::File::create(&file).unwrap();
            writeln!(
                f,
                "rate_limit_per_minute: 5\nrate_limit_per_hour: 40\nsecret_key: abc\nallowed_origins:\n  - https://example.com"
            )
            .unwrap();
        }

        let config = GatewayConfig::from_file(file.to_str().unwrap()).unwrap();
        std::fs::remove_file(&file).ok();

        assert_eq!(config.limits(), Limits::new(5, 40));
        assert_eq!(config.secret_key, "abc");
        assert_eq!(config.allowed_origins, vec!["https://example.com".to_string()]);
        assert_eq!(config.redis_url, "redis://localhost:6379");
    }
}
