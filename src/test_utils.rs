use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::ports::catalog::{CatalogEndpoint, FetchWindow, Page, UpstreamError};
use crate::rate_limit::store::StoreError;
use crate::rate_limit::{RateLimitInfo, RateLimiter};
use crate::sync::executor::RequestExecutor;

/// Limiter that always grants a token.
pub struct PermissiveLimiter {
    pub retry_after: Duration,
}

#[async_trait::async_trait]
impl RateLimiter for PermissiveLimiter {
    async fn acquire(&self) -> bool {
        true
    }

    async fn rate_limit_info(&self) -> Result<RateLimitInfo, StoreError> {
        Ok(RateLimitInfo {
            remaining: u32::MAX,
            reset_at: Utc::now(),
            limit: u32::MAX,
        })
    }

    fn retry_after(&self) -> Duration {
        self.retry_after
    }
}

/// Executor with a permissive limiter, 1s retry-after and no inter-request delay.
pub fn test_executor() -> RequestExecutor {
    RequestExecutor::new(
        Arc::new(PermissiveLimiter {
            retry_after: Duration::from_secs(1),
        }),
        Duration::ZERO,
        CancellationToken::new(),
    )
}

type Latency = Box<dyn Fn(&FetchWindow) -> Duration + Send + Sync>;

/// In-memory catalog serving `items` through offset or cursor windows.
///
/// Cursor windows resume after the item whose `id` equals the cursor.
pub struct FakeCatalog {
    items: Vec<Value>,
    reports_total: bool,
    latency: Option<Latency>,
    failures: Mutex<HashMap<u64, UpstreamError>>,
    requests: Mutex<Vec<FetchWindow>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeCatalog {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            reports_total: true,
            latency: None,
            failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// `count` items shaped `{"id": "item-<i>", "index": <i>}`.
    pub fn numbered(count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|i| json!({ "id": format!("item-{i}"), "index": i }))
                .collect(),
        )
    }

    pub fn without_total(mut self) -> Self {
        self.reports_total = false;
        self
    }

    pub fn with_latency(
        mut self,
        latency: impl Fn(&FetchWindow) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.latency = Some(Box::new(latency));
        self
    }

    /// Every request for an offset window starting at `offset` fails with `error`.
    pub fn failing_at(self, offset: u64, error: UpstreamError) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(offset, error);
        }
        self
    }

    pub fn requests(&self) -> Vec<FetchWindow> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn slice(&self, start: usize, limit: u32) -> Vec<Value> {
        self.items
            .iter()
            .skip(start)
            .take(limit as usize)
            .cloned()
            .collect()
    }

    fn page(&self, window: &FetchWindow) -> Result<Page, UpstreamError> {
        let items = match window {
            FetchWindow::Offset { offset, limit } => {
                if let Some(error) = self.failures.lock().unwrap().get(offset) {
                    return Err(error.clone());
                }
                self.slice(*offset as usize, *limit)
            }
            FetchWindow::Cursor { after, limit } => {
                let start = match after {
                    None => 0,
                    Some(after) => self
                        .items
                        .iter()
                        .position(|item| item["id"].as_str() == Some(after.as_str()))
                        .map(|position| position + 1)
                        .unwrap_or(self.items.len()),
                };
                self.slice(start, *limit)
            }
        };

        Ok(Page {
            items,
            total: self.reports_total.then_some(self.items.len() as u64),
        })
    }
}

#[async_trait::async_trait]
impl CatalogEndpoint for FakeCatalog {
    async fn fetch(&self, window: &FetchWindow) -> Result<Page, UpstreamError> {
        self.requests.lock().unwrap().push(window.clone());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = &self.latency {
            tokio::time::sleep(latency(window)).await;
        }
        let page = self.page(window);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        page
    }
}
