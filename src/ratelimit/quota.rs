//! Remaining-quota views.
//!
//! Backends produce a [`Quota`]; [`QuotaReport`] is the public projection used
//! for response bodies and `X-RateLimit-*` headers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::backend::{BackendKind, Limits};
use super::window::TimeWindow;

/// Note attached to reports produced while degraded.
const DEGRADED_NOTE: &str =
    "Shared counter store unavailable - stricter in-memory limits are in effect";

/// Quota for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowQuota {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl WindowQuota {
    /// Build the view for `window` given the requests already counted in it.
    ///
    /// `reset_at` is `now` plus the full window length. It is an upper bound,
    /// not the exact moment the counter expires.
    pub fn from_count(window: TimeWindow, limit: u64, count: u64, now: DateTime<Utc>) -> Self {
        Self {
            limit,
            remaining: limit.saturating_sub(count),
            reset_at: now + window.delta(),
        }
    }
}

/// Quota for every window, tagged with the backend that computed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub minute: WindowQuota,
    pub hour: WindowQuota,
    pub backend: BackendKind,
}

impl Quota {
    /// Build a quota from per-window counts.
    pub fn from_counts(
        backend: BackendKind,
        limits: Limits,
        minute_count: u64,
        hour_count: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            minute: WindowQuota::from_count(
                TimeWindow::Minute,
                limits.per_minute,
                minute_count,
                now,
            ),
            hour: WindowQuota::from_count(TimeWindow::Hour, limits.per_hour, hour_count, now),
            backend,
        }
    }

    pub fn window(&self, window: TimeWindow) -> &WindowQuota {
        match window {
            TimeWindow::Minute => &self.minute,
            TimeWindow::Hour => &self.hour,
        }
    }
}

/// Client-visible quota report.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaReport {
    pub minute: WindowQuota,
    pub hour: WindowQuota,
    pub backend: BackendKind,
    pub fallback_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QuotaReport {
    /// Header name/value pairs describing the per-minute quota.
    pub fn headers(&self) -> [(&'static str, String); 4] {
        [
            ("x-ratelimit-limit", self.minute.limit.to_string()),
            ("x-ratelimit-remaining", self.minute.remaining.to_string()),
            (
                "x-ratelimit-reset",
                self.minute
                    .reset_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("x-ratelimit-backend", self.backend.to_string()),
        ]
    }
}

impl From<Quota> for QuotaReport {
    fn from(quota: Quota) -> Self {
        let fallback_mode = quota.backend == BackendKind::LocalFallback;
        Self {
            minute: quota.minute,
            hour: quota.hour,
            backend: quota.backend,
            fallback_mode,
            message: fallback_mode.then(|| DEGRADED_NOTE.to_string()),
        }
    }
}
