//! Record repository contract and key-value implementation.
//!
//! # Responsibility
//! - Provide create/get/list/update/delete over the `pokemons` collection.
//! - Keep key layout and existence checks inside the persistence boundary.
//!
//! # Invariants
//! - `create` never checks existence; the allocator guarantees a fresh key.
//! - `update` and `delete` verify existence before writing, according to
//!   `RepositoryOptions::existence_check`. The check and the write are not
//!   atomic: a record deleted in between is written back by `update`.
//! - `update` stores exactly the caller's fields unless
//!   `UpdateMode::PreserveCreatedAt` is selected.

use crate::kv::{KvEntry, KvError, KvKey, KvStore};
use crate::model::record::{
    Fields, Record, RecordId, RecordValidationError, CREATED_AT_FIELD, ID_FIELD,
};
use crate::repo::allocator::{IdAllocator, DEFAULT_MAX_ATTEMPTS};
use chrono::{SecondsFormat, Utc};
use log::debug;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Key prefix (and counter name) of the records collection.
pub const COLLECTION: &str = "pokemons";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for record persistence and lookups.
#[derive(Debug)]
pub enum RepoError {
    NotFound(RecordId),
    InvalidId(String),
    EmptyCollection,
    Allocation { attempts: u32 },
    Validation(RecordValidationError),
    Store(KvError),
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::InvalidId(raw) => write!(f, "invalid record id `{raw}`"),
            Self::EmptyCollection => write!(f, "collection `{COLLECTION}` has no records"),
            Self::Allocation { attempts } => write!(
                f,
                "id allocation gave up after {attempts} conflicting attempts"
            ),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RecordValidationError> for RepoError {
    fn from(value: RecordValidationError) -> Self {
        match value {
            RecordValidationError::InvalidId(raw) => Self::InvalidId(raw),
            other => Self::Validation(other),
        }
    }
}

impl From<KvError> for RepoError {
    fn from(value: KvError) -> Self {
        Self::Store(value)
    }
}

/// How `update`/`delete` decide that a record exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExistenceCheck {
    /// Single-key read at `("pokemons", id)`.
    #[default]
    DirectLookup,
    /// Compatibility mode: scan the whole collection and match the stored
    /// `id` field. Costs O(collection) per call, and a record whose `id`
    /// field was dropped by a full-replace update can no longer be found.
    LegacyScan,
}

/// What `update` writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Store the caller's fields verbatim.
    #[default]
    Replace,
    /// Store the caller's fields with the previously stored `createdAt`.
    PreserveCreatedAt,
}

/// Outcome of `list` on an empty collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyListPolicy {
    /// Report `RepoError::EmptyCollection`.
    #[default]
    NotFound,
    /// Return an empty sequence.
    EmptyOk,
}

macro_rules! option_names {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok(Self::$variant),)+
                    other => Err(format!(
                        "unsupported value `{other}`; expected {}",
                        [$($name),+].join("|")
                    )),
                }
            }
        }

        impl Display for $ty {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

option_names!(ExistenceCheck {
    DirectLookup => "direct",
    LegacyScan => "scan",
});
option_names!(UpdateMode {
    Replace => "replace",
    PreserveCreatedAt => "preserve-created-at",
});
option_names!(EmptyListPolicy {
    NotFound => "not-found",
    EmptyOk => "empty-ok",
});

/// Behavior switches for [`KvRecordRepository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryOptions {
    pub existence_check: ExistenceCheck,
    pub update_mode: UpdateMode,
    pub empty_list: EmptyListPolicy,
    pub allocator_max_attempts: u32,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            existence_check: ExistenceCheck::default(),
            update_mode: UpdateMode::default(),
            empty_list: EmptyListPolicy::default(),
            allocator_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Result of `create`: the assigned id and the record as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRecord {
    pub id: RecordId,
    pub record: Record,
}

/// Repository interface for record CRUD operations.
pub trait RecordRepository {
    fn create(&self, fields: Fields) -> RepoResult<CreatedRecord>;
    fn get(&self, id: RecordId) -> RepoResult<Record>;
    fn list(&self) -> RepoResult<Vec<Record>>;
    /// Validates `raw_id`, then replaces the stored record with `fields`.
    fn update(&self, raw_id: &str, fields: Fields) -> RepoResult<Record>;
    fn delete(&self, id: RecordId) -> RepoResult<()>;
}

/// Record repository over any [`KvStore`].
pub struct KvRecordRepository<S: KvStore> {
    store: S,
    allocator: IdAllocator,
    options: RepositoryOptions,
    prefix: KvKey,
}

impl<S: KvStore> KvRecordRepository<S> {
    /// Repository with default options.
    pub fn new(store: S) -> Self {
        Self::with_options(store, RepositoryOptions::default())
    }

    pub fn with_options(store: S, options: RepositoryOptions) -> Self {
        Self {
            store,
            allocator: IdAllocator::for_collection(COLLECTION)
                .with_max_attempts(options.allocator_max_attempts),
            options,
            prefix: KvKey::root().with(COLLECTION),
        }
    }

    pub fn options(&self) -> &RepositoryOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    fn record_key(&self, id: RecordId) -> KvKey {
        self.prefix.clone().with(id.get())
    }

    /// Returns the stored record matching `id` according to the configured
    /// existence check.
    fn find_existing(&self, id: RecordId) -> RepoResult<Option<Record>> {
        match self.options.existence_check {
            ExistenceCheck::DirectLookup => self
                .store
                .get(&self.record_key(id))?
                .map(record_from_entry)
                .transpose(),
            ExistenceCheck::LegacyScan => {
                for entry in self.store.list(&self.prefix)? {
                    if entry
                        .value
                        .get(ID_FIELD)
                        .is_some_and(|stored| stored_id_matches(stored, id))
                    {
                        return record_from_entry(entry).map(Some);
                    }
                }
                Ok(None)
            }
        }
    }
}

impl<S: KvStore> RecordRepository for KvRecordRepository<S> {
    fn create(&self, fields: Fields) -> RepoResult<CreatedRecord> {
        let id = self.allocator.next(&self.store)?;
        let mut record = Record::from_fields(fields);
        record.stamp(id, now_iso8601());

        self.store.set(&self.record_key(id), &record.to_value())?;
        debug!("event=record_create module=repo status=ok id={}", id);

        Ok(CreatedRecord { id, record })
    }

    fn get(&self, id: RecordId) -> RepoResult<Record> {
        match self.store.get(&self.record_key(id))? {
            Some(entry) => record_from_entry(entry),
            None => Err(RepoError::NotFound(id)),
        }
    }

    fn list(&self) -> RepoResult<Vec<Record>> {
        let records = self
            .store
            .list(&self.prefix)?
            .into_iter()
            .map(record_from_entry)
            .collect::<RepoResult<Vec<_>>>()?;

        if records.is_empty() && self.options.empty_list == EmptyListPolicy::NotFound {
            return Err(RepoError::EmptyCollection);
        }

        Ok(records)
    }

    fn update(&self, raw_id: &str, fields: Fields) -> RepoResult<Record> {
        let id = RecordId::parse(raw_id)?;
        let existing = self.find_existing(id)?.ok_or(RepoError::NotFound(id))?;

        let mut record = Record::from_fields(fields);
        if self.options.update_mode == UpdateMode::PreserveCreatedAt {
            match existing.get(CREATED_AT_FIELD) {
                Some(created_at) => {
                    record.insert(CREATED_AT_FIELD, created_at.clone());
                }
                None => {
                    record.remove(CREATED_AT_FIELD);
                }
            }
        }

        self.store.set(&self.record_key(id), &record.to_value())?;
        debug!(
            "event=record_update module=repo status=ok id={} mode={} check={}",
            id, self.options.update_mode, self.options.existence_check
        );

        Ok(record)
    }

    fn delete(&self, id: RecordId) -> RepoResult<()> {
        if self.find_existing(id)?.is_none() {
            return Err(RepoError::NotFound(id));
        }

        self.store.delete(&self.record_key(id))?;
        debug!(
            "event=record_delete module=repo status=ok id={} check={}",
            id, self.options.existence_check
        );

        Ok(())
    }
}

fn record_from_entry(entry: KvEntry) -> RepoResult<Record> {
    let key = entry.key;
    Record::from_value(entry.value)
        .map_err(|err| RepoError::InvalidData(format!("entry {key}: {err}")))
}

/// Loose id comparison used by the scan check: integral numbers and numeric
/// strings both match.
fn stored_id_matches(stored: &Value, id: RecordId) -> bool {
    let wanted = id.get();
    match stored {
        Value::Number(number) => match number.as_i64() {
            Some(value) => value == wanted,
            None => number.as_f64() == Some(wanted as f64),
        },
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed.parse::<i64>().ok() == Some(wanted)
                || trimmed.parse::<f64>().ok() == Some(wanted as f64)
        }
        _ => false,
    }
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::{stored_id_matches, EmptyListPolicy, ExistenceCheck, UpdateMode};
    use crate::model::record::RecordId;
    use serde_json::json;

    #[test]
    fn stored_id_matches_numbers_and_numeric_strings() {
        let id = RecordId::new(4).expect("positive id");
        assert!(stored_id_matches(&json!(4), id));
        assert!(stored_id_matches(&json!(4.0), id));
        assert!(stored_id_matches(&json!("4"), id));
        assert!(!stored_id_matches(&json!(5), id));
        assert!(!stored_id_matches(&json!("four"), id));
        assert!(!stored_id_matches(&json!(null), id));
    }

    #[test]
    fn option_names_parse_case_insensitively() {
        assert_eq!("SCAN".parse::<ExistenceCheck>(), Ok(ExistenceCheck::LegacyScan));
        assert_eq!(
            "preserve-created-at".parse::<UpdateMode>(),
            Ok(UpdateMode::PreserveCreatedAt)
        );
        assert_eq!(" empty-ok ".parse::<EmptyListPolicy>(), Ok(EmptyListPolicy::EmptyOk));
        let error = "merge".parse::<UpdateMode>().unwrap_err();
        assert!(error.contains("replace|preserve-created-at"));
    }

    #[test]
    fn option_names_round_trip_through_display() {
        for check in [ExistenceCheck::DirectLookup, ExistenceCheck::LegacyScan] {
            assert_eq!(check.to_string().parse::<ExistenceCheck>(), Ok(check));
        }
    }
}
