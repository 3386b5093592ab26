use std::time::Duration;

use chrono::{DateTime, Utc};

use super::clock::Clock;
use super::store::{CounterStore, StoreError};
use super::{RateLimitInfo, RateLimitSettings, RateLimiter, WINDOW};

const TOKENS_KEY: &str = "spotify_rate_limit";
const RESET_KEY: &str = "spotify_rate_limit_reset";

/// Limiter whose bucket lives in a [`CounterStore`], shared by every process
/// using the same store.
///
/// Refill policy: discrete windows. When a window has elapsed the first caller
/// to win the compare-and-swap on the reset time opens the next 60 second
/// window and refills the bucket to the burst size in the same atomic store
/// operation. Within a window, tokens are only taken by an atomic conditional
/// decrement.
pub struct SharedRateLimiter<S, C> {
    store: S,
    clock: C,
    settings: RateLimitSettings,
}

impl<S: CounterStore, C: Clock> SharedRateLimiter<S, C> {
    /// Seed the bucket if it does not exist yet. Fails when the store can't be reached.
    pub async fn connect(store: S, clock: C, settings: RateLimitSettings) -> Result<Self, StoreError> {
        let limiter = Self {
            store,
            clock,
            settings,
        };

        if limiter.store.exists(TOKENS_KEY).await? {
            log::debug!("Joining existing shared rate limit bucket");
        } else {
            log::debug!(
                "Creating shared rate limit bucket with {} tokens",
                settings.burst_size
            );
        }
        limiter.init_bucket().await?;

        Ok(limiter)
    }

    fn capacity(&self) -> i64 {
        i64::from(self.settings.burst_size.get())
    }

    async fn init_bucket(&self) -> Result<(), StoreError> {
        let next_reset = self.clock.now_millis() + WINDOW.as_millis() as i64;
        self.store.set_if_absent(TOKENS_KEY, self.capacity()).await?;
        self.store.set_if_absent(RESET_KEY, next_reset).await?;
        Ok(())
    }

    async fn try_acquire(&self) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();

        let reset_at = match self.store.get(RESET_KEY).await? {
            Some(reset_at) => reset_at,
            None => {
                // Bucket disappeared from the store; recreate it lazily.
                self.init_bucket().await?;
                return self.store.decrement_if_positive(TOKENS_KEY).await;
            }
        };

        if now >= reset_at {
            let next_reset = now + WINDOW.as_millis() as i64;
            // Opening the window and refilling the bucket is one store operation,
            // so nobody can spend leftovers of the old window after it moved.
            if self
                .store
                .compare_and_swap_with(
                    RESET_KEY,
                    reset_at,
                    next_reset,
                    TOKENS_KEY,
                    self.capacity() - 1,
                )
                .await?
            {
                log::debug!("Rate limit window elapsed, refilling bucket");
                return Ok(true);
            }
            // Another caller refilled first; compete for its tokens.
        }

        self.store.decrement_if_positive(TOKENS_KEY).await
    }
}

#[async_trait::async_trait]
impl<S: CounterStore, C: Clock> RateLimiter for SharedRateLimiter<S, C> {
    async fn acquire(&self) -> bool {
        match self.try_acquire().await {
            Ok(acquired) => acquired,
            Err(err) => {
                log::warn!("Rate limit store error, denying token: {}", err);
                false
            }
        }
    }

    async fn rate_limit_info(&self) -> Result<RateLimitInfo, StoreError> {
        let remaining = self.store.get(TOKENS_KEY).await?.unwrap_or(0).max(0);
        let reset_millis = self
            .store
            .get(RESET_KEY)
            .await?
            .unwrap_or_else(|| self.clock.now_millis());

        Ok(RateLimitInfo {
            remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
            reset_at: DateTime::<Utc>::from_timestamp_millis(reset_millis).unwrap_or_else(Utc::now),
            limit: self.settings.burst_size.get(),
        })
    }

    fn retry_after(&self) -> Duration {
        self.settings.retry_after
    }
}
