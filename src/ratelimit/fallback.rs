//! In-memory fallback rate limiter.
//!
//! Used while the shared counter store is unreachable. Each identifier keeps
//! the timestamps of its admitted requests; minute and hour counts are derived
//! from that single sequence. Entries live in a sharded map, and the shard lock
//! is held across check and append so concurrent requests for one identifier
//! cannot both slip under the limit.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use super::backend::{BackendError, BackendKind, CountingBackend, Denial, Limits, Verdict};
use super::quota::Quota;
use super::window::TimeWindow;

/// Per-identifier retention; a little over an hour so the hour count is exact.
const RETENTION_SECS: i64 = 65 * 60;
/// Minimum spacing between global sweeps.
const SWEEP_INTERVAL_SECS: i64 = 10 * 60;
/// Timestamps older than this are dropped by a global sweep.
const SWEEP_RETENTION_SECS: i64 = 2 * 3600;

/// Snapshot of the fallback limiter's memory use.
#[derive(Debug, Clone, Serialize)]
pub struct FallbackStatus {
    pub active_identifiers: usize,
    pub total_requests: usize,
    pub limits: Limits,
    pub last_sweep: Option<DateTime<Utc>>,
}

/// Timestamp-list sliding window limiter held entirely in process memory.
///
/// Unlike the shared backend, a denied request is not recorded.
pub struct LocalFallbackBackend {
    requests: DashMap<String, VecDeque<DateTime<Utc>>>,
    limits: Limits,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl LocalFallbackBackend {
    pub fn new(limits: Limits) -> Self {
        Self {
            requests: DashMap::new(),
            limits,
            last_sweep: Mutex::new(None),
        }
    }

    /// Check and record a request for `identifier` at `now`.
    pub fn check(&self, identifier: &str, now: DateTime<Utc>) -> Verdict {
        self.maybe_sweep(now);

        let mut entry = self.requests.entry(identifier.to_owned()).or_default();
        let timestamps = entry.value_mut();
        trim(timestamps, now - TimeDelta::seconds(RETENTION_SECS));

        for window in TimeWindow::ALL {
            let limit = self.limits.for_window(window);
            let (count, oldest) = count_since(timestamps, now - window.delta());
            if count >= limit {
                let retry_after = oldest
                    .map(|t| t + window.delta() - now)
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or_else(|| window.duration());
                debug!(
                    identifier = %identifier,
                    window = %window,
                    count = count,
                    limit = limit,
                    "Fallback rate limit exceeded"
                );
                return Verdict::Denied(Denial {
                    window,
                    limit,
                    retry_after,
                    degraded: true,
                });
            }
        }

        timestamps.push_back(now);
        Verdict::Allowed
    }

    /// Remaining quota for `identifier` at `now`.
    pub fn quota(&self, identifier: &str, now: DateTime<Utc>) -> Quota {
        let (minute, hour) = match self.requests.get(identifier) {
            Some(entry) => (
                count_since(entry.value(), now - TimeWindow::Minute.delta()).0,
                count_since(entry.value(), now - TimeWindow::Hour.delta()).0,
            ),
            None => (0, 0),
        };
        Quota::from_counts(BackendKind::LocalFallback, self.limits, minute, hour, now)
    }

    /// Number of timestamps currently retained for `identifier`.
    pub fn retained(&self, identifier: &str) -> usize {
        self.requests.get(identifier).map_or(0, |e| e.len())
    }

    pub fn status(&self) -> FallbackStatus {
        let mut active_identifiers = 0;
        let mut total_requests = 0;
        for entry in self.requests.iter() {
            active_identifiers += 1;
            total_requests += entry.len();
        }
        FallbackStatus {
            active_identifiers,
            total_requests,
            limits: self.limits,
            last_sweep: *self.last_sweep.lock(),
        }
    }

    /// Drop old timestamps and empty identifiers if the last sweep is stale.
    ///
    /// Must not be called while holding a map entry: `retain` locks every shard.
    fn maybe_sweep(&self, now: DateTime<Utc>) {
        {
            let mut last = self.last_sweep.lock();
            match *last {
                None => {
                    *last = Some(now);
                    return;
                }
                Some(at) if now - at <= TimeDelta::seconds(SWEEP_INTERVAL_SECS) => return,
                Some(_) => *last = Some(now),
            }
        }

        let cutoff = now - TimeDelta::seconds(SWEEP_RETENTION_SECS);
        self.requests.retain(|_, timestamps| {
            trim(timestamps, cutoff);
            !timestamps.is_empty()
        });
        info!(
            active_identifiers = self.requests.len(),
            "Swept fallback rate limiter memory"
        );
    }
}

#[async_trait]
impl CountingBackend for LocalFallbackBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LocalFallback
    }

    fn limits(&self) -> Limits {
        self.limits
    }

    async fn try_consume(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Verdict, BackendError> {
        Ok(self.check(identifier, now))
    }

    async fn remaining_quota(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Quota, BackendError> {
        Ok(self.quota(identifier, now))
    }
}

/// Pop timestamps at or before `cutoff` from the front.
fn trim(timestamps: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while let Some(&front) = timestamps.front() {
        if front > cutoff {
            break;
        }
        timestamps.pop_front();
    }
}

/// Count timestamps strictly after `since`, with the oldest of them.
fn count_since(
    timestamps: &VecDeque<DateTime<Utc>>,
    since: DateTime<Utc>,
) -> (u64, Option<DateTime<Utc>>) {
    let in_window = timestamps.iter().copied().filter(|&t| t > since);
    let oldest = in_window.clone().min();
    (in_window.count() as u64, oldest)
}
