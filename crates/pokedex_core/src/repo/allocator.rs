//! Durable identifier allocation.
//!
//! # Responsibility
//! - Hand out strictly increasing record identifiers.
//!
//! # Invariants
//! - Counter state lives in the store, outside the collection prefix, so it
//!   survives restarts of a persistent store and deletes of records.
//! - A value is only returned after the compare-and-set that publishes it
//!   has committed; no two callers can observe the same value.

use crate::kv::{KvKey, KvStore};
use crate::model::record::RecordId;
use crate::repo::record_repo::{RepoError, RepoResult};
use log::{debug, warn};
use serde_json::Value;

/// Top-level key part under which all counters live.
pub const COUNTER_NAMESPACE: &str = "__counters";
/// Default bound on optimistic allocation attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 32;

/// Optimistic compare-and-set allocator over a counter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAllocator {
    counter_key: KvKey,
    max_attempts: u32,
}

impl IdAllocator {
    /// Allocator whose counter is stored at `("__counters", collection)`.
    pub fn for_collection(collection: &str) -> Self {
        Self {
            counter_key: KvKey::root().with(COUNTER_NAMESPACE).with(collection),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the attempt bound; values below one are raised to one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn counter_key(&self) -> &KvKey {
        &self.counter_key
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the next identifier.
    ///
    /// Each attempt reads the counter and proposes `current + 1` guarded by
    /// the observed versionstamp. A conflicting writer forces a fresh read.
    ///
    /// # Errors
    /// - `RepoError::Allocation` when every attempt lost to a concurrent writer.
    /// - `RepoError::InvalidData` when the counter entry is not a positive
    ///   integer below `i64::MAX`.
    /// - `RepoError::Store` on store failures.
    pub fn next<S: KvStore + ?Sized>(&self, store: &S) -> RepoResult<RecordId> {
        for attempt in 1..=self.max_attempts {
            let current = store.get(&self.counter_key)?;
            let (expected, last) = match &current {
                Some(entry) => (Some(entry.versionstamp), counter_value(&entry.value)?),
                None => (None, 0),
            };
            let next = last.checked_add(1).ok_or_else(|| {
                RepoError::InvalidData(format!("counter {} overflowed", self.counter_key))
            })?;

            if store
                .compare_and_set(&self.counter_key, expected, &Value::from(next))?
                .is_some()
            {
                debug!(
                    "event=id_allocate module=repo status=ok attempt={} id={}",
                    attempt, next
                );
                return RecordId::new(next).map_err(RepoError::from);
            }

            debug!(
                "event=id_allocate module=repo status=conflict attempt={} max_attempts={}",
                attempt, self.max_attempts
            );
        }

        warn!(
            "event=id_allocate module=repo status=error error_code=allocation_exhausted attempts={}",
            self.max_attempts
        );
        Err(RepoError::Allocation {
            attempts: self.max_attempts,
        })
    }
}

fn counter_value(value: &Value) -> RepoResult<i64> {
    value
        .as_i64()
        .filter(|current| *current >= 0)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid counter value `{value}`")))
}
