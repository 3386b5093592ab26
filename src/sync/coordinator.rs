use std::time::Duration;

use futures::TryStreamExt;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::SyncError;
use crate::ports::catalog::CatalogEndpoint;
use crate::ports::sink::Sink;

use super::collections::{EndpointDescriptor, Pagination};
use super::executor::RequestExecutor;
use super::pager::Pager;
use super::parallel::ParallelBatchFetcher;
use super::transform::ItemTransform;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub collection: String,
    pub item_count: usize,
    pub elapsed: Duration,
}

/// One collection to sync as part of [`SyncCoordinator::sync_all`].
pub struct SyncJob {
    pub endpoint: Box<dyn CatalogEndpoint>,
    pub descriptor: EndpointDescriptor,
}

pub struct SyncCoordinator<S: Sink> {
    executor: RequestExecutor,
    sink: S,
    batch_size: u32,
    max_concurrent: usize,
}

impl<S: Sink> SyncCoordinator<S> {
    pub fn new(executor: RequestExecutor, sink: S, batch_size: u32, max_concurrent: usize) -> Self {
        Self {
            executor,
            sink,
            batch_size,
            max_concurrent,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Fetch the whole collection, then hand it to the sink in one call.
    ///
    /// A descriptor with a split persists two collections and reports both.
    pub async fn sync_collection(
        &self,
        endpoint: &dyn CatalogEndpoint,
        descriptor: &EndpointDescriptor,
    ) -> Result<Vec<SyncReport>, SyncError> {
        let started = Instant::now();
        log::info!("Syncing {}", descriptor.collection);

        let items = match &descriptor.pagination {
            Pagination::Offset => {
                let pager = Pager::offset(&self.executor, endpoint, self.batch_size);
                let raw = pager.into_stream().try_collect().await?;
                transform_all(raw, descriptor.transform.clone()).await?
            }
            Pagination::Cursor { cursor_field } => {
                let pager =
                    Pager::cursor(&self.executor, endpoint, self.batch_size, cursor_field.clone());
                let raw = pager.into_stream().try_collect().await?;
                transform_all(raw, descriptor.transform.clone()).await?
            }
            Pagination::Parallel => {
                let transform = descriptor.transform.clone();
                ParallelBatchFetcher::new(&self.executor, self.batch_size, self.max_concurrent)
                    .fetch_all(endpoint, move |item| transform.apply(item))
                    .await?
            }
        };

        // Entries whose projected field is missing (e.g. removed tracks).
        let mut items: Vec<Value> = items.into_iter().filter(|item| !item.is_null()).collect();

        if let Some(rule) = &descriptor.dedupe {
            let before = items.len();
            items = rule.apply(items);
            log::debug!(
                "Dedupe on {} removed {} duplicates from {}",
                rule.key,
                before - items.len(),
                descriptor.collection
            );
        }

        let collections = match &descriptor.split {
            Some(split) => {
                let (matching, others) = split.partition(items);
                vec![
                    (descriptor.collection.clone(), matching),
                    (split.other_collection.clone(), others),
                ]
            }
            None => vec![(descriptor.collection.clone(), items)],
        };

        let mut reports = Vec::with_capacity(collections.len());
        for (collection, items) in collections {
            let item_count = items.len();
            self.sink
                .persist(&collection, items)
                .await
                .map_err(|reason| SyncError::Sink {
                    collection: collection.clone(),
                    reason,
                })?;

            let elapsed = started.elapsed();
            log::info!(
                "Synced {} items of {} in {}",
                item_count,
                collection,
                humantime::format_duration(elapsed)
            );
            reports.push(SyncReport {
                collection,
                item_count,
                elapsed,
            });
        }

        Ok(reports)
    }

    /// Sync each job in order, stopping at the first failure.
    pub async fn sync_all(&self, jobs: &[SyncJob]) -> Result<Vec<SyncReport>, SyncError> {
        let mut reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            if self.executor.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            reports.extend(
                self.sync_collection(job.endpoint.as_ref(), &job.descriptor)
                    .await?,
            );
        }
        Ok(reports)
    }
}

async fn transform_all(items: Vec<Value>, transform: ItemTransform) -> Result<Vec<Value>, SyncError> {
    let items = tokio::task::spawn_blocking(move || {
        items
            .into_iter()
            .map(|item| transform.apply(item))
            .collect::<Vec<Value>>()
    })
    .await?;
    Ok(items)
}
