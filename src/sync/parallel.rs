use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::SyncError;
use crate::ports::catalog::{CatalogEndpoint, FetchWindow};

use super::executor::RequestExecutor;

/// Fetches a collection of known size as concurrent offset batches.
///
/// A one-item probe learns the total, then `ceil(total / batch_size)` batches
/// run with at most `max_concurrent` in flight. Output keeps offset order no
/// matter which batch finishes first. The first unrecoverable batch error
/// aborts the whole fetch.
pub struct ParallelBatchFetcher<'a> {
    executor: &'a RequestExecutor,
    batch_size: u32,
    max_concurrent: usize,
}

impl<'a> ParallelBatchFetcher<'a> {
    pub fn new(executor: &'a RequestExecutor, batch_size: u32, max_concurrent: usize) -> Self {
        Self {
            executor,
            batch_size,
            max_concurrent,
        }
    }

    pub async fn fetch_all<T, F>(
        &self,
        endpoint: &dyn CatalogEndpoint,
        transform: F,
    ) -> Result<Vec<T>, SyncError>
    where
        T: Send + 'static,
        F: Fn(Value) -> T + Send + Sync + 'static,
    {
        let probe_window = FetchWindow::Offset {
            offset: 0,
            limit: 1,
        };
        let probe_ref = &probe_window;
        let probe = self
            .executor
            .execute(move || endpoint.fetch(probe_ref))
            .await?;
        let total = probe.total.ok_or(SyncError::MissingTotal)?;

        let batch_size = u64::from(self.batch_size);
        let num_batches = total.div_ceil(batch_size);
        log::info!(
            "Fetching {} items in {} batches of {} ({} concurrent)",
            total,
            num_batches,
            batch_size,
            self.max_concurrent
        );

        let semaphore = Semaphore::new(self.max_concurrent);
        let transform = Arc::new(transform);

        let batches = (0..num_batches).map(|index| {
            let semaphore = &semaphore;
            let transform = transform.clone();
            async move {
                // The semaphore is never closed.
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| SyncError::Cancelled)?;

                let window = FetchWindow::Offset {
                    offset: index * batch_size,
                    limit: self.batch_size,
                };
                let window_ref = &window;
                let page = self
                    .executor
                    .execute(move || endpoint.fetch(window_ref))
                    .await?;
                log::debug!(
                    "Batch {} ({}) returned {} of {} items",
                    index,
                    window,
                    page.items.len(),
                    window.limit()
                );

                let items = tokio::task::spawn_blocking(move || {
                    page.items
                        .into_iter()
                        .map(|item| transform(item))
                        .collect::<Vec<T>>()
                })
                .await?;

                Ok::<_, SyncError>(items)
            }
        });

        let batches = try_join_all(batches).await?;
        Ok(batches.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ports::catalog::UpstreamError;
    use crate::test_utils::{FakeCatalog, test_executor};

    fn offset_of(window: &FetchWindow) -> u64 {
        match window {
            FetchWindow::Offset { offset, .. } => *offset,
            FetchWindow::Cursor { .. } => 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_preserves_offset_order_despite_completion_order() {
        // Later batches finish first.
        let catalog = FakeCatalog::numbered(237)
            .with_latency(|window| Duration::from_millis(1_000 - offset_of(window)));
        let executor = test_executor();
        let fetcher = ParallelBatchFetcher::new(&executor, 50, 10);

        let items = fetcher.fetch_all(&catalog, |item| item).await.unwrap();

        assert_eq!(items.len(), 237);
        for (position, item) in items.iter().enumerate() {
            assert_eq!(item["index"], position);
        }

        let requests = catalog.requests();
        assert_eq!(requests.len(), 6);
        assert_eq!(
            requests[0],
            FetchWindow::Offset {
                offset: 0,
                limit: 1
            }
        );
        let mut batch_offsets: Vec<u64> = requests[1..].iter().map(offset_of).collect();
        batch_offsets.sort_unstable();
        assert_eq!(batch_offsets, vec![0, 50, 100, 150, 200]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_respects_max_concurrent() {
        let catalog =
            FakeCatalog::numbered(100).with_latency(|_| Duration::from_millis(200));
        let executor = test_executor();
        let fetcher = ParallelBatchFetcher::new(&executor, 10, 3);

        let items = fetcher.fetch_all(&catalog, |item| item).await.unwrap();

        assert_eq!(items.len(), 100);
        assert_eq!(catalog.max_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_applies_transform_to_every_item() {
        let catalog = FakeCatalog::numbered(12);
        let executor = test_executor();
        let fetcher = ParallelBatchFetcher::new(&executor, 5, 2);

        let ids = fetcher
            .fetch_all(&catalog, |item| item["id"].as_str().unwrap_or_default().to_string())
            .await
            .unwrap();

        assert_eq!(ids.len(), 12);
        assert_eq!(ids[0], "item-0");
        assert_eq!(ids[11], "item-11");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_collection_only_probes() {
        let catalog = FakeCatalog::numbered(0);
        let executor = test_executor();
        let fetcher = ParallelBatchFetcher::new(&executor, 50, 4);

        let items = fetcher.fetch_all(&catalog, |item| item).await.unwrap();

        assert!(items.is_empty());
        assert_eq!(catalog.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_error_aborts_fetch() {
        let catalog = FakeCatalog::numbered(150).failing_at(
            100,
            UpstreamError::Status {
                status: 502,
                message: "bad gateway".into(),
            },
        );
        let executor = test_executor();
        let fetcher = ParallelBatchFetcher::new(&executor, 50, 4);

        let result = fetcher.fetch_all(&catalog, |item| item).await;

        assert!(matches!(
            result,
            Err(SyncError::Upstream(UpstreamError::Status { status: 502, .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_total_is_an_error() {
        let endpoint = FakeCatalog::numbered(120).without_total();
        let executor = test_executor();
        let fetcher = ParallelBatchFetcher::new(&executor, 50, 4);

        let result = fetcher.fetch_all(&endpoint, |item| item).await;

        assert!(matches!(result, Err(SyncError::MissingTotal)));
        assert_eq!(endpoint.requests().len(), 1);
    }
}
