use std::collections::HashMap;
use std::sync::Mutex;

use color_eyre::eyre::{Result, eyre};
use serde_json::Value;

use crate::ports::sink::Sink;

/// Keeps persisted collections in memory, replacing earlier runs of the same name.
#[derive(Debug, Default)]
pub struct MemorySink {
    collections: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, name: &str) -> Option<Vec<Value>> {
        self.collections.lock().ok()?.get(name).cloned()
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn persist(&self, collection: &str, items: Vec<Value>) -> Result<()> {
        self.collections
            .lock()
            .map_err(|_| eyre!("Memory sink lock poisoned"))?
            .insert(collection.to_string(), items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_latest_persist_wins() {
        let sink = MemorySink::new();
        assert!(sink.collection("playlists").is_none());

        sink.persist("playlists", vec![json!(1)]).await.unwrap();
        sink.persist("playlists", vec![json!(2), json!(3)]).await.unwrap();

        assert_eq!(sink.collection("playlists"), Some(vec![json!(2), json!(3)]));
    }
}
