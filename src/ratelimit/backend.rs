//! Counting backend trait shared by the Redis adapter and the in-memory fallback.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::quota::Quota;
use super::window::TimeWindow;

/// Absolute floor for the fallback per-minute limit.
const FALLBACK_MINUTE_FLOOR: u64 = 5;
/// Absolute floor for the fallback per-hour limit.
const FALLBACK_HOUR_FLOOR: u64 = 50;

/// Request caps for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub per_minute: u64,
    pub per_hour: u64,
}

impl Limits {
    pub fn new(per_minute: u64, per_hour: u64) -> Self {
        Self {
            per_minute,
            per_hour,
        }
    }

    /// Limit configured for the given window.
    pub fn for_window(&self, window: TimeWindow) -> u64 {
        match window {
            TimeWindow::Minute => self.per_minute,
            TimeWindow::Hour => self.per_hour,
        }
    }

    /// Stricter limits applied while the shared store is unreachable.
    ///
    /// Half of each limit with an absolute floor, never above the configured limit.
    pub fn degraded(&self) -> Self {
        Self {
            per_minute: (self.per_minute / 2)
                .max(FALLBACK_MINUTE_FLOOR)
                .min(self.per_minute),
            per_hour: (self.per_hour / 2)
                .max(FALLBACK_HOUR_FLOOR)
                .min(self.per_hour),
        }
    }
}

/// Which backend produced a decision or quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Centralized counter store (Redis).
    SharedStore,
    /// In-process timestamp counter.
    LocalFallback,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::SharedStore => "shared_store",
            BackendKind::LocalFallback => "local_fallback",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a throttled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Window whose limit was exceeded.
    pub window: TimeWindow,
    /// Limit in force for that window.
    pub limit: u64,
    /// How long until the caller can expect to be admitted again.
    pub retry_after: Duration,
    /// Whether the stricter fallback limits produced this denial.
    pub degraded: bool,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Rate limit exceeded: {} requests per {}",
            self.limit, self.window
        )?;
        if self.degraded {
            f.write_str(" (shared counter store unavailable - stricter limits apply)")?;
        }
        Ok(())
    }
}

/// Outcome of a single consume attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Denied(Denial),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// Transport-level failure talking to a counter store.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("counter store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("counter store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// A backend able to count requests per identifier and window.
///
/// `now` is always supplied by the caller so implementations never read the
/// wall clock themselves.
#[async_trait]
pub trait CountingBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Limits this backend enforces.
    fn limits(&self) -> Limits;

    /// Check the limits for `identifier` and, when allowed, record one request
    /// in every window. The check and the record are atomic per identifier.
    async fn try_consume(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Verdict, BackendError>;

    /// Remaining quota for `identifier` without recording anything.
    async fn remaining_quota(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Quota, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_limits_halve_with_floor() {
        assert_eq!(Limits::new(10, 100).degraded(), Limits::new(5, 50));
        assert_eq!(Limits::new(40, 1000).degraded(), Limits::new(20, 500));
        assert_eq!(Limits::new(6, 60).degraded(), Limits::new(5, 50));
    }

    #[test]
    fn test_degraded_limits_never_exceed_primary() {
        let limits = Limits::new(3, 20);
        let degraded = limits.degraded();
        assert_eq!(degraded, Limits::new(3, 20));
        assert!(degraded.per_minute <= limits.per_minute);
        assert!(degraded.per_hour <= limits.per_hour);
    }

    #[test]
    fn test_denial_message() {
        let denial = Denial {
            window: TimeWindow::Minute,
            limit: 5,
            retry_after: Duration::from_secs(30),
            degraded: false,
        };
        assert_eq!(denial.to_string(), "Rate limit exceeded: 5 requests per minute");

        let degraded = Denial {
            degraded: true,
            window: TimeWindow::Hour,
            limit: 50,
            ..denial
        };
        let message = degraded.to_string();
        assert!(message.starts_with("Rate limit exceeded: 50 requests per hour"));
        assert!(message.contains("stricter limits apply"));
    }
}
