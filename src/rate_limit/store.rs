use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Rate limit store is unavailable: {0}")]
    Unavailable(String),
    #[error("Rate limit store query failed: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Integer counters with the atomic primitives the shared limiter needs.
///
/// Every mutation that the limiter relies on for correctness is a single
/// conditional update, so concurrent callers (threads or processes) never
/// observe a negative token count.
#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError>;

    /// Create the counter unless it exists. Returns whether it was created.
    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, StoreError>;

    /// Replace `expected` with `new`. Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError>;

    /// Decrement when the counter is positive. Returns whether it was decremented.
    async fn decrement_if_positive(&self, key: &str) -> Result<bool, StoreError>;

    /// Replace `expected` with `new` at `key` and, in the same atomic step, set
    /// `other_key` to `other_value`. Nothing is written unless `key` matches.
    async fn compare_and_swap_with(
        &self,
        key: &str,
        expected: i64,
        new: i64,
        other_key: &str,
        other_value: i64,
    ) -> Result<bool, StoreError>;
}

#[async_trait::async_trait]
impl<S: CounterStore + ?Sized> CounterStore for Arc<S> {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, StoreError> {
        (**self).set_if_absent(key, value).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError> {
        (**self).compare_and_swap(key, expected, new).await
    }

    async fn decrement_if_positive(&self, key: &str) -> Result<bool, StoreError> {
        (**self).decrement_if_positive(key).await
    }

    async fn compare_and_swap_with(
        &self,
        key: &str,
        expected: i64,
        new: i64,
        other_key: &str,
        other_value: i64,
    ) -> Result<bool, StoreError> {
        (**self)
            .compare_and_swap_with(key, expected, new, other_key, other_value)
            .await
    }
}

/// Process-local counters, backing the `window` limiter.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, i64>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, i64>>, StoreError> {
        self.counters
            .lock()
            .map_err(|_| StoreError::Unavailable("counter map lock poisoned".into()))
    }
}

#[async_trait::async_trait]
impl CounterStore for MemoryCounterStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.counters()?.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.counters()?.get(key).copied())
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.counters()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> Result<bool, StoreError> {
        let mut counters = self.counters()?;
        if counters.contains_key(key) {
            return Ok(false);
        }
        counters.insert(key.to_string(), value);
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: i64,
        new: i64,
    ) -> Result<bool, StoreError> {
        let mut counters = self.counters()?;
        match counters.get_mut(key) {
            Some(current) if *current == expected => {
                *current = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn decrement_if_positive(&self, key: &str) -> Result<bool, StoreError> {
        let mut counters = self.counters()?;
        match counters.get_mut(key) {
            Some(current) if *current > 0 => {
                *current -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn compare_and_swap_with(
        &self,
        key: &str,
        expected: i64,
        new: i64,
        other_key: &str,
        other_value: i64,
    ) -> Result<bool, StoreError> {
        let mut counters = self.counters()?;
        match counters.get_mut(key) {
            Some(current) if *current == expected => {
                *current = new;
                counters.insert(other_key.to_string(), other_value);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_keeps_existing_value() {
        let store = MemoryCounterStore::new();

        assert!(store.set_if_absent("tokens", 5).await.unwrap());
        assert!(!store.set_if_absent("tokens", 9).await.unwrap());
        assert_eq!(store.get("tokens").await.unwrap(), Some(5));
        assert!(store.exists("tokens").await.unwrap());
        assert!(!store.exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_decrement_never_goes_negative() {
        let store = MemoryCounterStore::new();
        store.set("tokens", 2).await.unwrap();

        assert!(store.decrement_if_positive("tokens").await.unwrap());
        assert!(store.decrement_if_positive("tokens").await.unwrap());
        assert!(!store.decrement_if_positive("tokens").await.unwrap());
        assert_eq!(store.get("tokens").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_compare_and_swap_only_matches_expected() {
        let store = MemoryCounterStore::new();
        store.set("reset", 100).await.unwrap();

        assert!(!store.compare_and_swap("reset", 99, 200).await.unwrap());
        assert!(store.compare_and_swap("reset", 100, 200).await.unwrap());
        assert_eq!(store.get("reset").await.unwrap(), Some(200));
        assert!(!store.compare_and_swap("missing", 0, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_swap_with_writes_both_or_neither() {
        let store = MemoryCounterStore::new();
        store.set("reset", 100).await.unwrap();
        store.set("tokens", 2).await.unwrap();

        assert!(!store.compare_and_swap_with("reset", 99, 200, "tokens", 9).await.unwrap());
        assert_eq!(store.get("reset").await.unwrap(), Some(100));
        assert_eq!(store.get("tokens").await.unwrap(), Some(2));

        assert!(store.compare_and_swap_with("reset", 100, 200, "tokens", 9).await.unwrap());
        assert_eq!(store.get("reset").await.unwrap(), Some(200));
        assert_eq!(store.get("tokens").await.unwrap(), Some(9));
    }
}
