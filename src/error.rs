use crate::ports::catalog::UpstreamError;
use crate::rate_limit::store::StoreError;

/// Fatal outcome of a sync run. Throttling never shows up here; the request
/// executor absorbs it.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Probe response did not report a collection total")]
    MissingTotal,

    #[error("Sink failed to persist {collection}: {reason:#}")]
    Sink {
        collection: String,
        reason: color_eyre::Report,
    },

    #[error("Item transform worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Sync cancelled")]
    Cancelled,
}
