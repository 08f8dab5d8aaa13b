//! Ordered key-value store contract and backends.
//!
//! # Responsibility
//! - Define the store interface the record repository is built on: single-key
//!   reads and writes, prefix scans, and single-key compare-and-set.
//! - Provide a persistent SQLite backend and a process-local memory backend.
//!
//! # Invariants
//! - Every committed write receives a versionstamp strictly greater than all
//!   versionstamps previously issued by the same store.
//! - `compare_and_set` is atomic with respect to every other writer of the
//!   same store, including other connections to the same SQLite file.
//! - `list` returns entries in encoded key order.

use crate::db::DbError;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod key;
mod memory;
mod sqlite;

pub use key::{KeyPart, KvKey};
pub use memory::MemoryKvStore;
pub use sqlite::{SharedSqliteKvStore, SqliteKvStore};

/// Store-wide write version attached to each entry.
pub type Versionstamp = u64;

pub type KvResult<T> = Result<T, KvError>;

/// Error raised by key-value store backends.
#[derive(Debug)]
pub enum KvError {
    Db(DbError),
    Encoding(serde_json::Error),
    InvalidKey(String),
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    LockPoisoned,
}

impl Display for KvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Encoding(err) => write!(f, "value encoding failed: {err}"),
            Self::InvalidKey(message) => write!(f, "invalid stored key: {message}"),
            Self::InvalidData(message) => write!(f, "invalid stored entry: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match required {expected_version}; open it with db::open_db"
            ),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
            Self::LockPoisoned => write!(f, "store lock poisoned by a panicked writer"),
        }
    }
}

impl Error for KvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encoding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for KvError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for KvError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for KvError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encoding(value)
    }
}

/// One stored key/value pair with its write version.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub key: KvKey,
    pub value: Value,
    pub versionstamp: Versionstamp,
}

/// Ordered key-value store with prefix scans and single-key compare-and-set.
pub trait KvStore {
    /// Reads one key.
    fn get(&self, key: &KvKey) -> KvResult<Option<KvEntry>>;

    /// Reads every entry whose key has `prefix` as a tuple prefix, in key order.
    fn list(&self, prefix: &KvKey) -> KvResult<Vec<KvEntry>>;

    /// Writes `value` under `key`, replacing any previous value.
    fn set(&self, key: &KvKey, value: &Value) -> KvResult<Versionstamp>;

    /// Removes `key`; succeeds when the key is already absent.
    fn delete(&self, key: &KvKey) -> KvResult<()>;

    /// Writes `value` only if the current versionstamp of `key` equals
    /// `expected` (`None` requires the key to be absent).
    ///
    /// Returns the new versionstamp, or `None` when another writer got there
    /// first.
    fn compare_and_set(
        &self,
        key: &KvKey,
        expected: Option<Versionstamp>,
        value: &Value,
    ) -> KvResult<Option<Versionstamp>>;
}

impl<S: KvStore + ?Sized> KvStore for &S {
    fn get(&self, key: &KvKey) -> KvResult<Option<KvEntry>> {
        (**self).get(key)
    }

    fn list(&self, prefix: &KvKey) -> KvResult<Vec<KvEntry>> {
        (**self).list(prefix)
    }

    fn set(&self, key: &KvKey, value: &Value) -> KvResult<Versionstamp> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &KvKey) -> KvResult<()> {
        (**self).delete(key)
    }

    fn compare_and_set(
        &self,
        key: &KvKey,
        expected: Option<Versionstamp>,
        value: &Value,
    ) -> KvResult<Option<Versionstamp>> {
        (**self).compare_and_set(key, expected, value)
    }
}

impl<S: KvStore + ?Sized> KvStore for Arc<S> {
    fn get(&self, key: &KvKey) -> KvResult<Option<KvEntry>> {
        (**self).get(key)
    }

    fn list(&self, prefix: &KvKey) -> KvResult<Vec<KvEntry>> {
        (**self).list(prefix)
    }

    fn set(&self, key: &KvKey, value: &Value) -> KvResult<Versionstamp> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &KvKey) -> KvResult<()> {
        (**self).delete(key)
    }

    fn compare_and_set(
        &self,
        key: &KvKey,
        expected: Option<Versionstamp>,
        value: &Value,
    ) -> KvResult<Option<Versionstamp>> {
        (**self).compare_and_set(key, expected, value)
    }
}
