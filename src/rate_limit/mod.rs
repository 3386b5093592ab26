//! Token-bucket gate shared by every request of a sync run.
//!
//! Two backends implement [`RateLimiter`]:
//! - [`memory::InMemoryRateLimiter`]: process-local, continuous refill (GCRA via `governor`).
//! - [`shared::SharedRateLimiter`]: discrete 60 second windows over a [`store::CounterStore`].
//!   Over the SQLite store, several processes pointed at the same file share one budget.

pub mod clock;
pub mod memory;
pub mod shared;
pub mod sqlite_store;
pub mod store;

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::RateLimitBackend;

use self::clock::SystemClock;
use self::memory::InMemoryRateLimiter;
use self::shared::SharedRateLimiter;
use self::sqlite_store::SqliteCounterStore;
use self::store::{MemoryCounterStore, StoreError};

/// Length of one rate-limit window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Interval between `acquire` attempts while waiting for a token.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Requests allowed per 60 second window.
    pub per_minute: NonZeroU32,
    /// Bucket capacity.
    pub burst_size: NonZeroU32,
    /// Delay after the catalog explicitly throttles a request.
    pub retry_after: Duration,
}

/// Point-in-time view of the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub limit: u32,
}

#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    /// Try to take one token without waiting.
    async fn acquire(&self) -> bool;

    /// Poll [`RateLimiter::acquire`] until a token is granted. Never fails.
    async fn wait_for_token(&self) {
        while !self.acquire().await {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn rate_limit_info(&self) -> Result<RateLimitInfo, StoreError>;

    /// Delay to honour after an explicit throttling signal from the catalog.
    fn retry_after(&self) -> Duration;
}

/// Build the limiter selected by configuration.
///
/// The SQLite backend connects and seeds the bucket here, so an unreachable
/// store fails the run before any request is made.
pub async fn build_rate_limiter(
    backend: RateLimitBackend,
    store_path: &Path,
    settings: RateLimitSettings,
) -> Result<Arc<dyn RateLimiter>, StoreError> {
    match backend {
        RateLimitBackend::Memory => {
            log::debug!(
                "Using in-memory rate limiter: {} per minute, burst {}",
                settings.per_minute,
                settings.burst_size
            );
            Ok(Arc::new(InMemoryRateLimiter::new(settings)))
        }
        RateLimitBackend::Window => {
            log::debug!("Using windowed in-memory rate limiter, burst {}", settings.burst_size);
            let limiter =
                SharedRateLimiter::connect(MemoryCounterStore::new(), SystemClock, settings).await?;
            Ok(Arc::new(limiter))
        }
        RateLimitBackend::Sqlite => {
            log::debug!(
                "Using shared rate limiter backed by {}",
                store_path.display()
            );
            let store = SqliteCounterStore::open(store_path).await?;
            let limiter = SharedRateLimiter::connect(store, SystemClock, settings).await?;
            Ok(Arc::new(limiter))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RateLimitSettings {
        RateLimitSettings {
            per_minute: NonZeroU32::new(60).unwrap(),
            burst_size: NonZeroU32::new(2).unwrap(),
            retry_after: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_build_memory_backend() {
        let limiter = build_rate_limiter(RateLimitBackend::Memory, Path::new("unused"), settings())
            .await
            .unwrap();

        assert!(limiter.acquire().await);
        assert_eq!(limiter.retry_after(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_build_window_backend() {
        let limiter = build_rate_limiter(RateLimitBackend::Window, Path::new("unused"), settings())
            .await
            .unwrap();

        assert!(limiter.acquire().await);
        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);
        assert_eq!(limiter.rate_limit_info().await.unwrap().remaining, 0);
    }

    #[tokio::test]
    async fn test_build_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits").join("rate_limit.sqlite");

        let limiter = build_rate_limiter(RateLimitBackend::Sqlite, &path, settings())
            .await
            .unwrap();

        assert!(limiter.acquire().await);
        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);
        assert!(path.exists());
    }
}
