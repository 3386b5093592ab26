use std::path::Path;
use std::time::Duration;

use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectOptions, ConnectionTrait, Database as SeaDatabase,
    DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};

use crate::entities::rate_limit_counter;

use super::store::{CounterStore, StoreError};

const CREATE_COUNTER_TABLE: &str = "CREATE TABLE IF NOT EXISTS rate_limit_counter (
    counter_key TEXT PRIMARY KEY NOT NULL,
    counter_value INTEGER NOT NULL
)";

/// Counter store backed by a SQLite file. Every process that opens the same
/// file shares the counters; each primitive is one conditional statement, so
/// SQLite's write lock makes it atomic across processes.
pub struct SqliteCounterStore {
    conn: DatabaseConnection,
}

impl SqliteCounterStore {
    /// Open (or create) the store at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        log::debug!("Opening rate limit store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                StoreError::Unavailable(format!(
                    "failed to create store directory {}: {}",
                    parent.display(),
                    err
                ))
            })?;
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(4)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let conn = SeaDatabase::connect(opt).await.map_err(|err| {
            StoreError::Unavailable(format!("failed to open {}: {}", path.display(), err))
        })?;

        conn.execute_unprepared(CREATE_COUNTER_TABLE).await?;

        log::info!("Rate limit store ready at: {}", path.display());
        Ok(Self { conn })
    }

    fn upsert(key: &str, value: i64) -> sea_orm::Insert<rate_limit_counter::ActiveModel> {
        rate_limit_counter::Entity::insert(Self::counter(key, value)).on_conflict(
            OnConflict::column(rate_limit_counter::Column::CounterKey)
                .update_column(rate_limit_counter::Column::CounterValue)
                .to_owned(),
        )
    }

    fn counter(key: &str, value: i64) -> rate_limit_counter::ActiveModel {
        rate_limit_counter::ActiveModel {
            counter_key: Set(key.to_string()),
            counter_value: Set(value),
        }
    }
}

#[async_trait::async_trait]
impl CounterStore for SqliteCounterStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let counter = rate_limit_counter::Entity::find_by_id(key.to_string())
            .one(&self.conn)
            .await?;
        Ok(counter.map(|counter| counter.counter_value))
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        Self::upsert(key, value)
            .exec_without_returning(&self.conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, StoreError> {
        let inserted = rate_limit_counter::Entity::insert(Self::counter(key, value))
            .on_conflict(
                OnConflict::column(rate_limit_counter::Column::CounterKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;
        Ok(inserted > 0)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError> {
        let result = rate_limit_counter::Entity::update_many()
            .col_expr(rate_limit_counter::Column::CounterValue, Expr::value(new))
            .filter(rate_limit_counter::Column::CounterKey.eq(key))
            .filter(rate_limit_counter::Column::CounterValue.eq(expected))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn decrement_if_positive(&self, key: &str) -> Result<bool, StoreError> {
        let result = rate_limit_counter::Entity::update_many()
            .col_expr(
                rate_limit_counter::Column::CounterValue,
                Expr::cust("counter_value - 1"),
            )
            .filter(rate_limit_counter::Column::CounterKey.eq(key))
            .filter(rate_limit_counter::Column::CounterValue.gt(0))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn compare_and_swap_with(
        &self,
        key: &str,
        expected: i64,
        new: i64,
        other_key: &str,
        other_value: i64,
    ) -> Result<bool, StoreError> {
        // The conditional UPDATE takes SQLite's write lock, so no other
        // connection sees `key` moved before `other_key` is written.
        let txn = self.conn.begin().await?;

        let swapped = rate_limit_counter::Entity::update_many()
            .col_expr(rate_limit_counter::Column::CounterValue, Expr::value(new))
            .filter(rate_limit_counter::Column::CounterKey.eq(key))
            .filter(rate_limit_counter::Column::CounterValue.eq(expected))
            .exec(&txn)
            .await?;
        if swapped.rows_affected != 1 {
            txn.rollback().await?;
            return Ok(false);
        }

        Self::upsert(other_key, other_value)
            .exec_without_returning(&txn)
            .await?;
        txn.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_round_trip_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCounterStore::open(&dir.path().join("limits.sqlite"))
            .await
            .unwrap();

        assert!(!store.exists("tokens").await.unwrap());
        assert!(store.set_if_absent("tokens", 2).await.unwrap());
        assert!(!store.set_if_absent("tokens", 7).await.unwrap());
        assert_eq!(store.get("tokens").await.unwrap(), Some(2));

        store.set("tokens", 4).await.unwrap();
        assert_eq!(store.get("tokens").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_conditional_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCounterStore::open(&dir.path().join("limits.sqlite"))
            .await
            .unwrap();
        store.set("tokens", 1).await.unwrap();
        store.set("reset", 1_000).await.unwrap();

        assert!(store.decrement_if_positive("tokens").await.unwrap());
        assert!(!store.decrement_if_positive("tokens").await.unwrap());
        assert_eq!(store.get("tokens").await.unwrap(), Some(0));

        assert!(!store.compare_and_swap("reset", 999, 2_000).await.unwrap());
        assert!(store.compare_and_swap("reset", 1_000, 2_000).await.unwrap());
        assert_eq!(store.get("reset").await.unwrap(), Some(2_000));
    }

    #[tokio::test]
    async fn test_window_swap_updates_both_counters_together() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.sqlite");
        let first = SqliteCounterStore::open(&path).await.unwrap();
        let second = SqliteCounterStore::open(&path).await.unwrap();
        first.set("reset", 1_000).await.unwrap();
        first.set("tokens", 3).await.unwrap();

        assert!(
            first
                .compare_and_swap_with("reset", 1_000, 61_000, "tokens", 4)
                .await
                .unwrap()
        );
        assert!(
            !second
                .compare_and_swap_with("reset", 1_000, 61_000, "tokens", 4)
                .await
                .unwrap()
        );

        assert_eq!(second.get("reset").await.unwrap(), Some(61_000));
        assert_eq!(second.get("tokens").await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_two_handles_share_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.sqlite");
        let first = SqliteCounterStore::open(&path).await.unwrap();
        let second = SqliteCounterStore::open(&path).await.unwrap();

        first.set("tokens", 1).await.unwrap();

        assert!(second.decrement_if_positive("tokens").await.unwrap());
        assert!(!first.decrement_if_positive("tokens").await.unwrap());
    }
}
