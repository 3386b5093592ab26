use std::fmt;

use serde_json::Value;

/// HTTP status the catalog uses to refuse a request for exceeding its rate limit.
pub const TOO_MANY_REQUESTS: u16 = 429;
/// Status the catalog client reports when reading the response timed out.
pub const READ_TIMEOUT: u16 = 443;

/// Describes a single page to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchWindow {
    Offset { offset: u64, limit: u32 },
    Cursor { after: Option<String>, limit: u32 },
}

impl FetchWindow {
    pub fn limit(&self) -> u32 {
        match self {
            FetchWindow::Offset { limit, .. } | FetchWindow::Cursor { limit, .. } => *limit,
        }
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchWindow::Offset { offset, limit } => write!(f, "offset={offset} limit={limit}"),
            FetchWindow::Cursor { after, limit } => match after {
                Some(after) => write!(f, "after={after} limit={limit}"),
                None => write!(f, "after=<start> limit={limit}"),
            },
        }
    }
}

/// One page of raw items as returned by the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Size of the whole collection, when the endpoint reports it.
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("Catalog refused the request: too many requests")]
    Throttled,
    #[error("Catalog response timed out")]
    Timeout,
    #[error("Catalog returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Failed to send request: {0}")]
    Transport(String),
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Classify a non-success status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            TOO_MANY_REQUESTS => UpstreamError::Throttled,
            READ_TIMEOUT => UpstreamError::Timeout,
            _ => UpstreamError::Status {
                status,
                message: message.into(),
            },
        }
    }

    /// Throttling and read timeouts are retried; everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Throttled | UpstreamError::Timeout)
    }
}

/// Port trait for one paginated collection endpoint of the remote catalog.
///
/// Implementations live in `spotify::client` (production) or test fakes.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CatalogEndpoint: Send + Sync {
    async fn fetch(&self, window: &FetchWindow) -> Result<Page, UpstreamError>;
}
