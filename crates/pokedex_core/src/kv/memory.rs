//! Process-local key-value store.
//!
//! Entries live in a `BTreeMap` keyed by the encoded key, so prefix scans are
//! range scans exactly as in the SQLite backend. Data is lost when the store
//! is dropped; the identifier counter is therefore only durable for the
//! lifetime of the value.

use super::key::prefix_range;
use super::{KvEntry, KvError, KvKey, KvResult, KvStore, Versionstamp};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// A `KvStore` held entirely in memory. Share it across threads with `Arc`.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<Vec<u8>, StoredValue>,
    versionstamp: Versionstamp,
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    versionstamp: Versionstamp,
}

impl MemoryState {
    fn write(&mut self, encoded_key: Vec<u8>, value: &Value) -> Versionstamp {
        self.versionstamp += 1;
        let versionstamp = self.versionstamp;
        self.entries.insert(
            encoded_key,
            StoredValue {
                value: value.clone(),
                versionstamp,
            },
        );
        versionstamp
    }
}

impl MemoryKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, counters included.
    pub fn len(&self) -> KvResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> KvResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> KvResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| KvError::LockPoisoned)
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &KvKey) -> KvResult<Option<KvEntry>> {
        let state = self.lock()?;
        Ok(state.entries.get(&key.encode()).map(|stored| KvEntry {
            key: key.clone(),
            value: stored.value.clone(),
            versionstamp: stored.versionstamp,
        }))
    }

    fn list(&self, prefix: &KvKey) -> KvResult<Vec<KvEntry>> {
        let (start, end) = prefix_range(prefix);
        let state = self.lock()?;
        state
            .entries
            .range(start..end)
            .map(|(encoded_key, stored)| {
                Ok(KvEntry {
                    key: KvKey::decode(encoded_key)?,
                    value: stored.value.clone(),
                    versionstamp: stored.versionstamp,
                })
            })
            .collect()
    }

    fn set(&self, key: &KvKey, value: &Value) -> KvResult<Versionstamp> {
        let mut state = self.lock()?;
        Ok(state.write(key.encode(), value))
    }

    fn delete(&self, key: &KvKey) -> KvResult<()> {
        self.lock()?.entries.remove(&key.encode());
        Ok(())
    }

    fn compare_and_set(
        &self,
        key: &KvKey,
        expected: Option<Versionstamp>,
        value: &Value,
    ) -> KvResult<Option<Versionstamp>> {
        let encoded_key = key.encode();
        let mut state = self.lock()?;
        let current = state
            .entries
            .get(&encoded_key)
            .map(|stored| stored.versionstamp);
        if current != expected {
            return Ok(None);
        }
        Ok(Some(state.write(encoded_key, value)))
    }
}
