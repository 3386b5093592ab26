//! Bulk retrieval engine: request execution, pagination, parallel batches,
//! dedupe, and the coordinator that ties them to a sink.

pub mod collections;
pub mod coordinator;
pub mod dedupe;
pub mod executor;
pub mod pager;
pub mod parallel;
pub mod transform;
