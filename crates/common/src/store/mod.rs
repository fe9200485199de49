//! Shared key-value store abstraction
//!
//! Workers coordinate only through a remote key-value store. [`SharedStore`]
//! captures the handful of primitives the limiter, the breaker and the metrics
//! flush need: versioned reads with compare-and-set, TTL writes, hash-field
//! increments and a score-ordered set. [`InMemoryStore`] implements it for a
//! single process (tests, local development, and the fail-open fallback).

pub mod keys;
pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

pub use memory::InMemoryStore;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a [`SharedStore`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or timed out
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store serialization error: {0}")]
    Serialization(String),

    /// The key holds a value of a different kind than the operation expects
    #[error("Wrong value type for key '{0}'")]
    WrongType(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl ErrorClassification for StoreError {
    fn is_retryable(&self) -> bool {
        self.is_unavailable()
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Unavailable(_) => ErrorSeverity::Warning,
            Self::Serialization(_) | Self::WrongType(_) => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A stored value together with the version it was read at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: String,
    pub version: u64,
}

/// Remote key-value store shared by all workers
///
/// Every method is a single self-contained round trip; implementations must
/// make each one atomic with respect to the key it touches.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a plain value and its current version.
    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>>;

    /// Write `value` only if the key is still at `expected_version`
    /// (`None` = the key must be absent). Returns whether the write happened.
    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> StoreResult<bool>;

    /// Unconditional write.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically add `delta` to a hash field, returning the new value.
    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>>;

    /// Add a member to a score-ordered set.
    async fn sorted_add(&self, key: &str, score: i64, member: String) -> StoreResult<()>;

    /// Members with `min <= score <= max`, ascending by score.
    async fn sorted_range(&self, key: &str, min: i64, max: i64) -> StoreResult<Vec<(i64, String)>>;

    /// Remove members with `score < below`; returns how many were removed.
    async fn sorted_remove_below(&self, key: &str, below: i64) -> StoreResult<usize>;
}

/// A JSON record read for a read-modify-write cycle
///
/// `version` is the version to pass to `compare_and_set`. A record that
/// exists but cannot be decoded has `value = None` and `Some(version)`, so the
/// next write overwrites it.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRecord<T> {
    pub value: Option<T>,
    pub version: Option<u64>,
}

/// Read and decode a JSON record, treating corrupt data as absent.
pub async fn read_json<T: DeserializeOwned>(
    store: &dyn SharedStore,
    key: &str,
) -> StoreResult<JsonRecord<T>> {
    let Some(versioned) = store.get(key).await? else {
        return Ok(JsonRecord { value: None, version: None });
    };

    let value = match serde_json::from_str(&versioned.value) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, error = %err, "Discarding corrupt record");
            None
        }
    };

    Ok(JsonRecord { value, version: Some(versioned.version) })
}

/// Encode `value` and compare-and-set it.
pub async fn write_json<T: Serialize + Sync>(
    store: &dyn SharedStore,
    key: &str,
    expected_version: Option<u64>,
    value: &T,
    ttl: Option<Duration>,
) -> StoreResult<bool> {
    let encoded = serde_json::to_string(value)?;
    store.compare_and_set(key, expected_version, encoded, ttl).await
}
