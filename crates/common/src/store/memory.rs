//! Process-local [`SharedStore`] implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{SharedStore, StoreError, StoreResult, Versioned};
use crate::resilience::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Slot {
    Value { value: String, version: u64, expires_at_ms: Option<u64> },
    Hash(HashMap<String, i64>),
    /// Kept ordered by `(score, member)`
    Sorted(Vec<(i64, String)>),
}

impl Slot {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self, Slot::Value { expires_at_ms: Some(at), .. } if *at <= now_ms)
    }
}

/// In-memory store with per-key atomicity and clock-driven TTLs
///
/// Versions come from a single counter and are never reused, so a key that is
/// deleted and recreated never matches a stale `expected_version`.
pub struct InMemoryStore<C: Clock = SystemClock> {
    entries: DashMap<String, Slot>,
    next_version: AtomicU64,
    clock: Arc<C>,
}

impl<C: Clock> std::fmt::Debug for InMemoryStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore").field("keys", &self.entries.len()).finish()
    }
}

impl InMemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for InMemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> InMemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self::with_shared_clock(Arc::new(clock))
    }

    pub(crate) fn with_shared_clock(clock: Arc<C>) -> Self {
        Self { entries: DashMap::new(), next_version: AtomicU64::new(1), clock }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.now_ms();
        self.entries.iter().filter(|entry| !entry.value().is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every key whose TTL has elapsed.
    pub fn purge_expired(&self) {
        let now = self.now_ms();
        self.entries.retain(|_, slot| !slot.is_expired(now));
    }

    fn now_ms(&self) -> u64 {
        self.clock.millis_since_epoch()
    }

    fn value_slot(&self, value: String, ttl: Option<Duration>) -> Slot {
        let expires_at_ms = ttl.map(|ttl| {
            let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
            self.now_ms().saturating_add(ttl_ms)
        });
        Slot::Value {
            value,
            version: self.next_version.fetch_add(1, Ordering::Relaxed),
            expires_at_ms,
        }
    }
}

#[async_trait]
impl<C: Clock> SharedStore for InMemoryStore<C> {
    async fn get(&self, key: &str) -> StoreResult<Option<Versioned>> {
        let now = self.now_ms();
        let found = match self.entries.get(key) {
            None => return Ok(None),
            Some(slot) => match &*slot {
                slot if slot.is_expired(now) => None,
                Slot::Value { value, version, .. } => {
                    Some(Versioned { value: value.clone(), version: *version })
                }
                _ => return Err(StoreError::WrongType(key.to_string())),
            },
        };

        if found.is_none() {
            self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        }
        Ok(found)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: String,
        ttl: Option<Duration>,
    ) -> StoreResult<bool> {
        let now = self.now_ms();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = match occupied.get() {
                    slot if slot.is_expired(now) => None,
                    Slot::Value { version, .. } => Some(*version),
                    _ => return Err(StoreError::WrongType(key.to_string())),
                };
                if current != expected_version {
                    return Ok(false);
                }
                occupied.insert(self.value_slot(value, ttl));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                if expected_version.is_some() {
                    return Ok(false);
                }
                vacant.insert(self.value_slot(value, ttl));
                Ok(true)
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let slot = self.value_slot(value, ttl);
        self.entries.insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.now_ms();
        Ok(self.entries.remove(key).is_some_and(|(_, slot)| !slot.is_expired(now)))
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut slot =
            self.entries.entry(key.to_string()).or_insert_with(|| Slot::Hash(HashMap::new()));
        match &mut *slot {
            Slot::Hash(fields) => {
                let counter = fields.entry(field.to_string()).or_insert(0);
                *counter = counter.saturating_add(delta);
                Ok(*counter)
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        match self.entries.get(key).as_deref() {
            None => Ok(HashMap::new()),
            Some(Slot::Hash(fields)) => Ok(fields.clone()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn sorted_add(&self, key: &str, score: i64, member: String) -> StoreResult<()> {
        let mut slot =
            self.entries.entry(key.to_string()).or_insert_with(|| Slot::Sorted(Vec::new()));
        match &mut *slot {
            Slot::Sorted(members) => {
                members.retain(|(_, existing)| *existing != member);
                let position = members
                    .partition_point(|(s, m)| (*s, m.as_str()) < (score, member.as_str()));
                members.insert(position, (score, member));
                Ok(())
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn sorted_range(&self, key: &str, min: i64, max: i64) -> StoreResult<Vec<(i64, String)>> {
        match self.entries.get(key).as_deref() {
            None => Ok(Vec::new()),
            Some(Slot::Sorted(members)) => Ok(members
                .iter()
                .filter(|(score, _)| (min..=max).contains(score))
                .cloned()
                .collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn sorted_remove_below(&self, key: &str, below: i64) -> StoreResult<usize> {
        let Some(mut slot) = self.entries.get_mut(key) else {
            return Ok(0);
        };
        match &mut *slot {
            Slot::Sorted(members) => {
                let before = members.len();
                members.retain(|(score, _)| *score >= below);
                Ok(before - members.len())
            }
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }
}
