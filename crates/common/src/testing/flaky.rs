//! Store double with switchable availability

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::resilience::{Clock, SystemClock};
use crate::store::{InMemoryStore, SharedStore, StoreError, StoreResult, Versioned};

/// Wraps an [`InMemoryStore`] and fails every call with
/// [`StoreError::Unavailable`] while it is down.
#[derive(Debug)]
pub struct FlakyStore<C: Clock = SystemClock> {
    inner: InMemoryStore<C>,
    available: AtomicBool,
    rejected: AtomicUsize,
}

impl FlakyStore<SystemClock> {
    pub fn new() -> Self {
        Self::wrap(InMemoryStore::new())
    }
}

impl Default for FlakyStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> FlakyStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self::wrap(InMemoryStore::with_clock(clock))
    }

    pub fn wrap(inner: InMemoryStore<C>) -> Self {
        Self { inner, available: AtomicBool::new(true), rejected: AtomicUsize::new(0) }
    }

    pub fn go_down(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.available.store(true, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Calls refused while the store was down
    pub fn rejected_calls(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    /// The wrapped store, reachable even while down
    pub fn inner(&self) -> &InMemoryStore<C> {
        &self.inner
    }

    fn check(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl<C: Clock> SharedStore for FlakyStore<C> {
    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.compare_and_set(key, expected_version, value, ttl).await
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.check()?;
        self.inner.hash_incr(key, field, delta).await
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        self.check()?;
        self.inner.hash_get_all(key).await
    }

    async fn sorted_add(&self, key: &str, score: i64, member: String) -> StoreResult<()> {
        self.check()?;
        self.inner.sorted_add(key, score, member).await
    }

    async fn sorted_range(&self, key: &str, min: i64, max: i64) -> StoreResult<Vec<(i64, String)>> {
        self.check()?;
        self.inner.sorted_range(key, min, max).await
    }

    async fn sorted_remove_below(&self, key: &str, below: i64) -> StoreResult<usize> {
        self.check()?;
        self.inner.sorted_remove_below(key, below).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_down_store_rejects_calls() {
        let store = FlakyStore::new();
        store.set("k", "v".into(), None).await.unwrap();

        store.go_down();
        assert_eq!(
            store.get("k").await,
            Err(StoreError::Unavailable("connection refused".to_string()))
        );
        assert_eq!(store.rejected_calls(), 1);

        store.recover();
        assert_eq!(store.get("k").await.unwrap().map(|v| v.value), Some("v".to_string()));
    }
}
