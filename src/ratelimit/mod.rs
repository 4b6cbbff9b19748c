//! Rate limiting logic and state management.

mod backend;
mod fallback;
mod limiter;
mod quota;
mod shared;
mod store;
mod window;

pub use backend::{BackendError, BackendKind, CountingBackend, Denial, Limits, Verdict};
pub use fallback::{FallbackStatus, LocalFallbackBackend};
pub use limiter::{LimiterStatus, Mode, RateLimitError, RateLimiter, DEFAULT_PROBE_INTERVAL};
pub use quota::{Quota, QuotaReport, WindowQuota};
pub use shared::SharedStoreBackend;
pub use store::{CounterStore, RedisStore};
pub use window::TimeWindow;

#[cfg(test)]
pub(crate) use store::testing;
