use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::ports::catalog::UpstreamError;
use crate::rate_limit::RateLimiter;

/// Runs single catalog requests under the rate limiter.
///
/// Each attempt waits for a token first. Throttled and timed out attempts are
/// retried after the limiter's retry-after delay with no cap on the number of
/// attempts; any other upstream error is returned immediately. A successful
/// response is followed by the fixed inter-request delay.
pub struct RequestExecutor {
    limiter: Arc<dyn RateLimiter>,
    inter_request_delay: Duration,
    cancel: CancellationToken,
}

impl RequestExecutor {
    pub fn new(
        limiter: Arc<dyn RateLimiter>,
        inter_request_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            limiter,
            inter_request_delay,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn execute<T, F, Fut>(&self, request: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let limiter = self.limiter.as_ref();
        let request = &request;
        let attempt = move || async move {
            limiter.wait_for_token().await;
            request().await
        };

        let backoff = ConstantBuilder::default()
            .with_delay(limiter.retry_after())
            .with_max_times(usize::MAX);

        let retried = attempt
            .retry(backoff)
            .when(UpstreamError::is_retryable)
            .notify(|err, delay| {
                log::warn!("{}, retrying in {}", err, humantime::format_duration(delay));
            });

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            response = retried => response?,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(self.inter_request_delay) => {}
        }

        Ok(response)
    }
}
