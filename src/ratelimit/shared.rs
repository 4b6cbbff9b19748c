//! Rate limiting against the shared counter store.
//!
//! Each identifier gets one counter per window bucket. Counters are created by
//! the first increment of a bucket and expire with the bucket, so stale windows
//! clean themselves up without any sweeping on our side.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::backend::{BackendError, BackendKind, CountingBackend, Denial, Limits, Verdict};
use super::quota::Quota;
use super::store::CounterStore;
use super::window::TimeWindow;

/// Key prefix for rate limit counters.
const KEY_PREFIX: &str = "rate_limit";

/// Rate limiter backed by a centralized counter store.
///
/// The request that crosses a limit is still counted. Later requests in the
/// same window therefore stay denied until the bucket rolls over.
pub struct SharedStoreBackend {
    store: Arc<dyn CounterStore>,
    limits: Limits,
}

impl SharedStoreBackend {
    pub fn new(store: Arc<dyn CounterStore>, limits: Limits) -> Self {
        Self { store, limits }
    }

    /// Store key for an identifier in the window bucket containing `now`.
    pub fn counter_key(identifier: &str, window: TimeWindow, now: DateTime<Utc>) -> String {
        format!(
            "{}:{}:{}:{}",
            KEY_PREFIX,
            window.name(),
            identifier,
            window.bucket(now)
        )
    }

    /// Liveness probe for the underlying store.
    pub async fn ping(&self) -> Result<(), BackendError> {
        self.store.ping().await
    }
}

#[async_trait]
impl CountingBackend for SharedStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SharedStore
    }

    fn limits(&self) -> Limits {
        self.limits
    }

    async fn try_consume(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Verdict, BackendError> {
        // Minute before hour: a minute denial never touches the hour counter.
        for window in TimeWindow::ALL {
            let key = Self::counter_key(identifier, window, now);
            let count = self.store.increment(&key, window.duration()).await?;
            let limit = self.limits.for_window(window);

            trace!(
                key = %key,
                count = count,
                limit = limit,
                "Incremented shared counter"
            );

            if count > limit {
                debug!(
                    identifier = %identifier,
                    window = %window,
                    count = count,
                    limit = limit,
                    "Shared rate limit exceeded"
                );
                return Ok(Verdict::Denied(Denial {
                    window,
                    limit,
                    retry_after: window.until_reset(now),
                    degraded: false,
                }));
            }
        }

        Ok(Verdict::Allowed)
    }

    async fn remaining_quota(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Quota, BackendError> {
        let minute = self
            .store
            .count(&Self::counter_key(identifier, TimeWindow::Minute, now))
            .await?;
        let hour = self
            .store
            .count(&Self::counter_key(identifier, TimeWindow::Hour, now))
            .await?;

        Ok(Quota::from_counts(
            BackendKind::SharedStore,
            self.limits,
            minute,
            hour,
            now,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::store::testing::MemoryStore;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 7, 0).unwrap()
    }

    fn backend(per_minute: u64, per_hour: u64) -> (Arc<MemoryStore>, SharedStoreBackend) {
        let store = Arc::new(MemoryStore::new());
        let backend = SharedStoreBackend::new(store.clone(), Limits::new(per_minute, per_hour));
        (store, backend)
    }

    #[test]
    fn test_counter_key_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 14, 7, 42).unwrap();
        assert_eq!(
            SharedStoreBackend::counter_key("abc", TimeWindow::Minute, now),
            "rate_limit:minute:abc:202403091407"
        );
        assert_eq!(
            SharedStoreBackend::counter_key("abc", TimeWindow::Hour, now),
            "rate_limit:hour:abc:2024030914"
        );
    }

    #[tokio::test]
    async fn test_allows_up_to_minute_limit() {
        let (_, backend) = backend(5, 100);

        for i in 1..=5 {
            let verdict = backend.try_consume("client", t0()).await.unwrap();
            assert!(verdict.is_allowed(), "Request {} should be allowed", i);
        }

        match backend.try_consume("client", t0()).await.unwrap() {
            Verdict::Denied(denial) => {
                assert_eq!(denial.window, TimeWindow::Minute);
                assert_eq!(denial.limit, 5);
                assert!(!denial.degraded);
                assert_eq!(denial.to_string(), "Rate limit exceeded: 5 requests per minute");
            }
            Verdict::Allowed => panic!("6th request should be denied"),
        }
    }

    #[tokio::test]
    async fn test_minute_rollover_readmits() {
        let (_, backend) = backend(5, 100);
        for _ in 0..5 {
            backend.try_consume("client", t0()).await.unwrap();
        }
        assert!(!backend.try_consume("client", t0()).await.unwrap().is_allowed());

        let later = t0() + chrono::TimeDelta::seconds(61);
        assert!(backend.try_consume("client", later).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_denied_request_is_still_counted() {
        let (store, backend) = backend(2, 100);
        for _ in 0..4 {
            backend.try_consume("client", t0()).await.unwrap();
        }
        let minute_key = SharedStoreBackend::counter_key("client", TimeWindow::Minute, t0());
        assert_eq!(store.value(&minute_key), 4);
    }

    #[tokio::test]
    async fn test_minute_denial_skips_hour_counter() {
        let (store, backend) = backend(2, 100);
        for _ in 0..5 {
            backend.try_consume("client", t0()).await.unwrap();
        }
        let hour_key = SharedStoreBackend::counter_key("client", TimeWindow::Hour, t0());
        assert_eq!(store.value(&hour_key), 2);
    }

    #[tokio::test]
    async fn test_hour_limit_denies_across_minutes() {
        let (_, backend) = backend(10, 3);
        for minute in 0..3 {
            let now = t0() + chrono::TimeDelta::minutes(minute);
            assert!(backend.try_consume("client", now).await.unwrap().is_allowed());
        }

        let now = t0() + chrono::TimeDelta::minutes(3);
        match backend.try_consume("client", now).await.unwrap() {
            Verdict::Denied(denial) => {
                assert_eq!(denial.window, TimeWindow::Hour);
                assert_eq!(denial.retry_after, Duration::from_secs(50 * 60));
            }
            Verdict::Allowed => panic!("hour limit should deny"),
        }
    }

    #[tokio::test]
    async fn test_first_increment_sets_window_ttl() {
        let (store, backend) = backend(5, 100);
        backend.try_consume("client", t0()).await.unwrap();

        let minute_key = SharedStoreBackend::counter_key("client", TimeWindow::Minute, t0());
        let hour_key = SharedStoreBackend::counter_key("client", TimeWindow::Hour, t0());
        assert_eq!(store.ttl(&minute_key), Some(Duration::from_secs(60)));
        assert_eq!(store.ttl(&hour_key), Some(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let (_, backend) = backend(1, 100);
        assert!(backend.try_consume("a", t0()).await.unwrap().is_allowed());
        assert!(!backend.try_consume("a", t0()).await.unwrap().is_allowed());
        assert!(backend.try_consume("b", t0()).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_remaining_quota() {
        let (_, backend) = backend(5, 100);
        let quota = backend.remaining_quota("client", t0()).await.unwrap();
        assert_eq!(quota.minute.remaining, 5);
        assert_eq!(quota.hour.remaining, 100);
        assert_eq!(quota.backend, BackendKind::SharedStore);

        for _ in 0..7 {
            backend.try_consume("client", t0()).await.unwrap();
        }
        let quota = backend.remaining_quota("client", t0()).await.unwrap();
        assert_eq!(quota.minute.remaining, 0);
        assert_eq!(quota.hour.remaining, 95);
    }

    #[tokio::test]
    async fn test_store_errors_are_surfaced() {
        let (store, backend) = backend(5, 100);
        store.set_down(true);
        assert!(backend.try_consume("client", t0()).await.is_err());
        assert!(backend.remaining_quota("client", t0()).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_consumers_admit_exactly_the_limit() {
        let (_, backend) = backend(10, 1000);
        let backend = Arc::new(backend);

        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let backend = backend.clone();
                tokio::spawn(async move { backend.try_consume("client", t0()).await.unwrap() })
            })
            .collect();

        let verdicts = futures::future::join_all(tasks).await;
        let allowed = verdicts
            .into_iter()
            .filter(|v| v.as_ref().unwrap().is_allowed())
            .count();
        assert_eq!(allowed, 10);
    }
}
