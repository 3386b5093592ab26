use color_eyre::eyre::Result;
use serde_json::Value;

/// Port trait for the storage that receives a fully fetched collection.
///
/// Implementations live in `sinks` (json file, memory).
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn persist(&self, collection: &str, items: Vec<Value>) -> Result<()>;
}
