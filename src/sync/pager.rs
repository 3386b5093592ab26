use std::collections::VecDeque;

use futures::Stream;
use serde_json::Value;

use crate::error::SyncError;
use crate::ports::catalog::{CatalogEndpoint, FetchWindow};

use super::executor::RequestExecutor;

enum Strategy {
    Offset { next_offset: u64 },
    Cursor { field: String, after: Option<String> },
}

/// Lazily walks a collection one page at a time.
///
/// Pages are only requested when the buffered items run out, so a caller that
/// stops early never pays for the remaining pages. Iteration ends on the first
/// empty page, or for cursor paging when the last item carries no cursor.
pub struct Pager<'a> {
    executor: &'a RequestExecutor,
    endpoint: &'a dyn CatalogEndpoint,
    page_size: u32,
    strategy: Strategy,
    buffer: VecDeque<Value>,
    exhausted: bool,
    requests_issued: usize,
}

impl<'a> Pager<'a> {
    /// Offsets 0, `page_size`, 2 * `page_size`, ...
    pub fn offset(
        executor: &'a RequestExecutor,
        endpoint: &'a dyn CatalogEndpoint,
        page_size: u32,
    ) -> Self {
        Self::with_strategy(executor, endpoint, page_size, Strategy::Offset { next_offset: 0 })
    }

    /// `cursor_field` is a JSON pointer into each item (for example `/id`).
    pub fn cursor(
        executor: &'a RequestExecutor,
        endpoint: &'a dyn CatalogEndpoint,
        page_size: u32,
        cursor_field: impl Into<String>,
    ) -> Self {
        Self::with_strategy(
            executor,
            endpoint,
            page_size,
            Strategy::Cursor {
                field: cursor_field.into(),
                after: None,
            },
        )
    }

    fn with_strategy(
        executor: &'a RequestExecutor,
        endpoint: &'a dyn CatalogEndpoint,
        page_size: u32,
        strategy: Strategy,
    ) -> Self {
        Self {
            executor,
            endpoint,
            page_size,
            strategy,
            buffer: VecDeque::new(),
            exhausted: false,
            requests_issued: 0,
        }
    }

    pub async fn next_item(&mut self) -> Result<Option<Value>, SyncError> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Ok(Some(item));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_next_page().await?;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Value, SyncError>> + 'a {
        let mut pager = self;
        async_stream::try_stream! {
            while let Some(item) = pager.next_item().await? {
                yield item;
            }
        }
    }

    fn next_window(&self) -> FetchWindow {
        match &self.strategy {
            Strategy::Offset { next_offset } => FetchWindow::Offset {
                offset: *next_offset,
                limit: self.page_size,
            },
            Strategy::Cursor { after, .. } => FetchWindow::Cursor {
                after: after.clone(),
                limit: self.page_size,
            },
        }
    }

    async fn fetch_next_page(&mut self) -> Result<(), SyncError> {
        let window = self.next_window();
        log::debug!("Fetching page {}", window);

        let endpoint = self.endpoint;
        let window_ref = &window;
        let page = self
            .executor
            .execute(move || endpoint.fetch(window_ref))
            .await?;
        self.requests_issued += 1;

        if page.items.is_empty() {
            log::debug!(
                "Empty page at {}, pagination complete after {} requests",
                window,
                self.requests_issued
            );
            self.exhausted = true;
            return Ok(());
        }

        match &mut self.strategy {
            Strategy::Offset { next_offset } => {
                *next_offset += u64::from(self.page_size);
            }
            Strategy::Cursor { field, after } => {
                match page.items.last().and_then(|item| cursor_value(item, field)) {
                    Some(next) => *after = Some(next),
                    None => {
                        log::debug!(
                            "Last item has no {} cursor, pagination complete after {} requests",
                            field,
                            self.requests_issued
                        );
                        self.exhausted = true;
                    }
                }
            }
        }

        self.buffer.extend(page.items);
        Ok(())
    }
}

fn cursor_value(item: &Value, pointer: &str) -> Option<String> {
    match item.pointer(pointer)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}
