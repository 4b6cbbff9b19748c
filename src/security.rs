//! Client identification and input hygiene.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Substrings stripped from user input.
const STRIPPED_PATTERNS: [&str; 4] = ["<script", "</script>", "javascript:", "onerror="];

/// Keywords that mark a message as unsafe to forward.
const UNSAFE_KEYWORDS: [&str; 5] = ["script", "eval", "exec", "system", "os."];

/// Hash a client address into an anonymized rate-limit identifier.
pub fn hash_identifier(address: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolve the caller's address: first `X-Forwarded-For` hop, else the peer.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|p| p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Remove markup patterns commonly used for script injection.
pub fn sanitize_input(text: &str) -> String {
    let mut cleaned = text.to_string();
    for pattern in STRIPPED_PATTERNS {
        while let Some(start) = cleaned.to_ascii_lowercase().find(pattern) {
            cleaned.replace_range(start..start + pattern.len(), "");
        }
    }
    cleaned.trim().to_string()
}

/// Whether a sanitized message may be forwarded to the generator.
pub fn is_content_safe(text: &str) -> bool {
    let lower = text.to_lowercase();
    !UNSAFE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Issue a new opaque session identifier.
pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_hash_is_stable_and_salted() {
        let a = hash_identifier("203.0.113.7", "secret");
        assert_eq!(a, hash_identifier("203.0.113.7", "secret"));
        assert_ne!(a, hash_identifier("203.0.113.7", "other"));
        assert_ne!(a, hash_identifier("203.0.113.8", "secret"));
        assert_eq!(a.len(), 64);
        assert!(!a.contains("203.0.113.7"));
    }

    #[test]
    fn test_client_address_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.4, 10.0.0.1"),
        );
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        assert_eq!(client_address(&headers, Some(peer)), "198.51.100.4");
    }

    #[test]
    fn test_client_address_falls_back_to_peer() {
        let peer: SocketAddr = "10.0.0.9:5000".parse().unwrap();
        assert_eq!(client_address(&HeaderMap::new(), Some(peer)), "10.0.0.9");
        assert_eq!(client_address(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_sanitize_strips_patterns_case_insensitively() {
        assert_eq!(sanitize_input("  hi <SCRIPT>alert(1)</script> "), "hi >alert(1)");
        assert_eq!(sanitize_input("JavaScript:void(0)"), "void(0)");
        assert_eq!(sanitize_input("plain question?"), "plain question?");
    }

    #[test]
    fn test_content_safety() {
        assert!(is_content_safe("What projects have you worked on?"));
        assert!(!is_content_safe("please eval this"));
        assert!(!is_content_safe("import OS.path"));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let a = new_session_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, new_session_id());
    }
}
