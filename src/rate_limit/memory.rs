use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use governor::clock::{Clock as GovernorClock, DefaultClock, Reference};
use governor::middleware::StateInformationMiddleware;
use governor::nanos::Nanos;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};

use super::store::StoreError;
use super::{RateLimitInfo, RateLimitSettings, RateLimiter};

type DirectGovernor<C> = Governor<NotKeyed, InMemoryState, C, StateInformationMiddleware>;

/// Bucket level seen at some instant. Tokens regained since are derived from
/// the replenish interval.
#[derive(Debug, Clone, Copy)]
struct Observation<I> {
    remaining: u32,
    at: I,
}

/// Process-local limiter. Tokens trickle back continuously, one every
/// `60s / per_minute`, capped at the burst size (GCRA).
pub struct InMemoryRateLimiter<C: GovernorClock = DefaultClock> {
    governor: DirectGovernor<C>,
    clock: C,
    settings: RateLimitSettings,
    last_seen: Mutex<Observation<C::Instant>>,
}

impl InMemoryRateLimiter<DefaultClock> {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, &DefaultClock::default())
    }
}

impl<C: GovernorClock> InMemoryRateLimiter<C> {
    pub fn with_clock(settings: RateLimitSettings, clock: &C) -> Self {
        let quota = Quota::per_minute(settings.per_minute).allow_burst(settings.burst_size);
        let governor =
            Governor::direct_with_clock(quota, clock).with_middleware::<StateInformationMiddleware>();

        Self {
            governor,
            clock: clock.clone(),
            settings,
            last_seen: Mutex::new(Observation {
                remaining: settings.burst_size.get(),
                at: clock.now(),
            }),
        }
    }

    fn replenish_interval(&self) -> Duration {
        Quota::per_minute(self.settings.per_minute).replenish_interval()
    }

    fn observe(&self, remaining: u32, at: C::Instant) {
        if let Ok(mut last_seen) = self.last_seen.lock() {
            *last_seen = Observation { remaining, at };
        }
    }

    /// Current bucket level and the time until the next token comes back.
    fn current_level(&self) -> (u32, Duration) {
        let burst = self.settings.burst_size.get();
        let Ok(last_seen) = self.last_seen.lock().map(|guard| *guard) else {
            return (burst, Duration::ZERO);
        };

        let interval = self.replenish_interval().as_nanos().max(1);
        let elapsed = Duration::from(self.clock.now().duration_since(last_seen.at)).as_nanos();
        let regained = elapsed / interval;
        let remaining = u128::from(last_seen.remaining)
            .saturating_add(regained)
            .min(u128::from(burst));

        if remaining == u128::from(burst) {
            return (burst, Duration::ZERO);
        }
        let until_next = interval - elapsed % interval;
        (
            remaining as u32,
            Duration::from_nanos(u64::try_from(until_next).unwrap_or(u64::MAX)),
        )
    }
}

#[async_trait::async_trait]
impl<C> RateLimiter for InMemoryRateLimiter<C>
where
    C: GovernorClock + Send + Sync + 'static,
    C::Instant: Send + Sync,
{
    async fn acquire(&self) -> bool {
        match self.governor.check() {
            Ok(snapshot) => {
                self.observe(snapshot.remaining_burst_capacity(), self.clock.now());
                true
            }
            Err(not_until) => {
                // Empty until one interval before the next token is due.
                let interval = Nanos::from(self.replenish_interval());
                self.observe(0, not_until.earliest_possible().saturating_sub(interval));
                false
            }
        }
    }

    async fn rate_limit_info(&self) -> Result<RateLimitInfo, StoreError> {
        let (remaining, until_next) = self.current_level();
        let next_token =
            chrono::Duration::from_std(until_next).unwrap_or_else(|_| chrono::Duration::zero());

        Ok(RateLimitInfo {
            remaining,
            reset_at: Utc::now() + next_token,
            limit: self.settings.burst_size.get(),
        })
    }

    fn retry_after(&self) -> Duration {
        self.settings.retry_after
    }
}
