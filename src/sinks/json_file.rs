use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use color_eyre::eyre::{Result, WrapErr};
use serde_json::Value;

use crate::ports::sink::Sink;

/// Writes each collection to `<root>/<YYYY-MM-DD>/<collection>.json`.
pub struct JsonFileSink {
    root: PathBuf,
    date: Option<NaiveDate>,
}

impl JsonFileSink {
    /// Dated by the local calendar day at persist time.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            date: None,
        }
    }

    pub fn for_date(root: impl Into<PathBuf>, date: NaiveDate) -> Self {
        Self {
            root: root.into(),
            date: Some(date),
        }
    }

    pub fn collection_path(&self, collection: &str) -> PathBuf {
        let date = self.date.unwrap_or_else(|| Local::now().date_naive());
        self.root
            .join(date.format("%Y-%m-%d").to_string())
            .join(format!("{}.json", collection))
    }
}

#[async_trait::async_trait]
impl Sink for JsonFileSink {
    async fn persist(&self, collection: &str, items: Vec<Value>) -> Result<()> {
        let path = self.collection_path(collection);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err_with(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = serde_json::to_vec_pretty(&items)
            .wrap_err_with(|| format!("Failed to serialize {}", collection))?;
        tokio::fs::write(&path, contents)
            .await
            .wrap_err_with(|| format!("Failed to write {}", path.display()))?;

        log::info!("Wrote {} items to {}", items.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_writes_dated_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let sink = JsonFileSink::for_date(dir.path(), date);

        sink.persist("saved_tracks", vec![json!({"id": "t1"}), json!({"id": "t2"})])
            .await
            .unwrap();

        let path = dir.path().join("2024-03-09").join("saved_tracks.json");
        assert_eq!(sink.collection_path("saved_tracks"), path);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains('\n'));
        let written: Vec<Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(written, vec![json!({"id": "t1"}), json!({"id": "t2"})]);
    }

    #[tokio::test]
    async fn test_overwrites_previous_run_of_same_day() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::for_date(dir.path(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());

        sink.persist("playlists", vec![json!(1), json!(2)]).await.unwrap();
        sink.persist("playlists", vec![json!(3)]).await.unwrap();

        let contents = std::fs::read_to_string(sink.collection_path("playlists")).unwrap();
        let written: Vec<Value> = serde_json::from_str(&contents).unwrap();
        assert_eq!(written, vec![json!(3)]);
    }

    #[tokio::test]
    async fn test_unwritable_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let sink = JsonFileSink::new(&blocker);

        let result = sink.persist("playlists", vec![]).await;

        tokio_test::assert_err!(result);
    }
}
