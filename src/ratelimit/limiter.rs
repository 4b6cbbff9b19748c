//! Rate limiter façade.
//!
//! Owns the shared-store backend and the in-memory fallback and decides which
//! one is authoritative:
//!
//! - `Primary`: the shared store answers. Any transport failure flips the
//!   limiter to `Degraded` and the same call is re-evaluated by the fallback.
//! - `Degraded`: the fallback answers with stricter limits. Every
//!   `probe_interval` calls the shared store is pinged; a successful ping
//!   switches back to `Primary` for that call and the ones after it.
//!
//! Counts do not carry over between backends, so a switch resets what a
//! client has used so far.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use super::backend::{BackendKind, CountingBackend, Denial, Limits, Verdict};
use super::fallback::{FallbackStatus, LocalFallbackBackend};
use super::quota::Quota;
use super::shared::SharedStoreBackend;
use super::store::CounterStore;

/// Default number of degraded calls between recovery probes.
pub const DEFAULT_PROBE_INTERVAL: u64 = 100;

/// Which backend is currently authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Primary,
    Degraded,
}

/// Errors surfaced to callers of the façade.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Normal throttling; the caller should wait.
    #[error("{0}")]
    LimitExceeded(Denial),

    /// No backend could render a decision; the request is refused.
    #[error("rate limiter unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Debug)]
struct Health {
    mode: Mode,
    calls_since_probe: u64,
}

/// Snapshot of the façade for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStatus {
    pub mode: Mode,
    pub backend: BackendKind,
    pub limits: Limits,
    pub fallback: FallbackStatus,
}

/// Rate limiter with automatic failover between a shared store and memory.
///
/// Construct once per process and share it behind an `Arc`.
pub struct RateLimiter {
    shared: SharedStoreBackend,
    fallback: LocalFallbackBackend,
    health: Mutex<Health>,
    probe_interval: u64,
}

impl RateLimiter {
    /// Create a limiter and probe the store once to pick the initial mode.
    pub async fn new(store: Arc<dyn CounterStore>, limits: Limits, probe_interval: u64) -> Self {
        let shared = SharedStoreBackend::new(store, limits);
        let fallback = LocalFallbackBackend::new(limits.degraded());

        let mode = match shared.ping().await {
            Ok(()) => {
                info!(
                    per_minute = limits.per_minute,
                    per_hour = limits.per_hour,
                    "Rate limiter using shared counter store"
                );
                Mode::Primary
            }
            Err(e) => {
                let degraded = fallback.limits();
                warn!(
                    error = %e,
                    per_minute = degraded.per_minute,
                    per_hour = degraded.per_hour,
                    "Shared counter store unreachable at startup, using in-memory limits"
                );
                Mode::Degraded
            }
        };

        Self {
            shared,
            fallback,
            health: Mutex::new(Health {
                mode,
                calls_since_probe: 0,
            }),
            probe_interval: probe_interval.max(1),
        }
    }

    /// Current mode.
    pub fn mode(&self) -> Mode {
        self.health.lock().mode
    }

    /// Check and record a request for `identifier` at the current time.
    pub async fn check(&self, identifier: &str) -> Result<(), RateLimitError> {
        self.try_consume(identifier, Utc::now()).await
    }

    /// Check and record a request for `identifier` at `now`.
    pub async fn try_consume(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RateLimitError> {
        let verdict = match self.begin_call().await {
            Mode::Primary => match self.shared.try_consume(identifier, now).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    self.degrade(&e.to_string());
                    self.consume_fallback(identifier, now).await?
                }
            },
            Mode::Degraded => self.consume_fallback(identifier, now).await?,
        };

        match verdict {
            Verdict::Allowed => {
                trace!(identifier = %identifier, "Request allowed");
                Ok(())
            }
            Verdict::Denied(denial) => Err(RateLimitError::LimitExceeded(denial)),
        }
    }

    /// Remaining quota for `identifier` at the current time.
    pub async fn quota(&self, identifier: &str) -> Result<Quota, RateLimitError> {
        self.remaining_quota(identifier, Utc::now()).await
    }

    /// Remaining quota for `identifier` at `now`, tagged with its backend.
    pub async fn remaining_quota(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Quota, RateLimitError> {
        let mode = self.begin_call().await;
        self.quota_in(mode, identifier, now).await
    }

    /// Remaining quota from the backend currently in charge, at the current time.
    ///
    /// Unlike [`RateLimiter::quota`] this is not counted as a call: it never
    /// advances the recovery probe cadence and never triggers a probe.
    pub async fn peek_quota(&self, identifier: &str) -> Result<Quota, RateLimitError> {
        self.peek_remaining_quota(identifier, Utc::now()).await
    }

    pub async fn peek_remaining_quota(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Quota, RateLimitError> {
        self.quota_in(self.mode(), identifier, now).await
    }

    async fn quota_in(
        &self,
        mode: Mode,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Quota, RateLimitError> {
        match mode {
            Mode::Primary => match self.shared.remaining_quota(identifier, now).await {
                Ok(quota) => Ok(quota),
                Err(e) => {
                    self.degrade(&e.to_string());
                    self.quota_fallback(identifier, now).await
                }
            },
            Mode::Degraded => self.quota_fallback(identifier, now).await,
        }
    }

    /// Ping the shared store without changing the mode.
    pub async fn probe(&self) -> bool {
        self.shared.ping().await.is_ok()
    }

    pub fn status(&self) -> LimiterStatus {
        let mode = self.mode();
        let (backend, limits) = match mode {
            Mode::Primary => (self.shared.kind(), self.shared.limits()),
            Mode::Degraded => (self.fallback.kind(), self.fallback.limits()),
        };
        LimiterStatus {
            mode,
            backend,
            limits,
            fallback: self.fallback.status(),
        }
    }

    /// Resolve the mode for one call, probing for recovery when due.
    async fn begin_call(&self) -> Mode {
        let probe_due = {
            let mut health = self.health.lock();
            match health.mode {
                Mode::Primary => return Mode::Primary,
                Mode::Degraded if health.calls_since_probe >= self.probe_interval => {
                    health.calls_since_probe = 0;
                    true
                }
                Mode::Degraded => {
                    health.calls_since_probe += 1;
                    false
                }
            }
        };

        if !probe_due {
            return Mode::Degraded;
        }

        match self.shared.ping().await {
            Ok(()) => {
                let mut health = self.health.lock();
                health.mode = Mode::Primary;
                health.calls_since_probe = 0;
                info!("Shared counter store reachable again, leaving degraded mode");
                Mode::Primary
            }
            Err(e) => {
                debug!(error = %e, "Recovery probe failed, staying degraded");
                Mode::Degraded
            }
        }
    }

    fn degrade(&self, reason: &str) {
        let mut health = self.health.lock();
        if health.mode == Mode::Primary {
            health.mode = Mode::Degraded;
            health.calls_since_probe = 0;
            warn!(
                error = %reason,
                "Shared counter store failed, switching to in-memory limits"
            );
        }
    }

    async fn consume_fallback(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Verdict, RateLimitError> {
        self.fallback
            .try_consume(identifier, now)
            .await
            .map_err(|e| {
                error!(error = %e, "Fallback rate limiter failed, refusing request");
                RateLimitError::ServiceUnavailable(e.to_string())
            })
    }

    async fn quota_fallback(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Quota, RateLimitError> {
        self.fallback
            .remaining_quota(identifier, now)
            .await
            .map_err(|e| {
                error!(error = %e, "Fallback quota lookup failed");
                RateLimitError::ServiceUnavailable(e.to_string())
            })
    }
}
