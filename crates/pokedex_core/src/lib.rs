//! Core domain logic for the Pokedex records service.
//! This crate is the single source of truth for collection invariants.

pub mod db;
pub mod kv;
pub mod logging;
pub mod model;
pub mod repo;

pub use kv::{
    KeyPart, KvEntry, KvError, KvKey, KvResult, KvStore, MemoryKvStore, SharedSqliteKvStore,
    SqliteKvStore,
};
pub use logging::{default_log_level, init_logging, init_stderr_logging, logging_status, LogTarget};
pub use model::record::{
    Fields, Record, RecordId, RecordValidationError, CREATED_AT_FIELD, ID_FIELD,
};
pub use repo::allocator::IdAllocator;
pub use repo::record_repo::{
    CreatedRecord, EmptyListPolicy, ExistenceCheck, KvRecordRepository, RecordRepository,
    RepoError, RepoResult, RepositoryOptions, UpdateMode, COLLECTION,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
