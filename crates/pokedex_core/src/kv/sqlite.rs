//! SQLite-backed key-value store.
//!
//! # Responsibility
//! - Persist entries in `kv_entries`, keyed by the encoded tuple key.
//! - Issue versionstamps from the `kv_meta` counter row.
//!
//! # Invariants
//! - Every write runs in an `IMMEDIATE` transaction, so the versionstamp bump,
//!   the compare step of compare-and-set and the row write commit together.
//! - Construction rejects connections that were not bootstrapped by
//!   `db::open_db`/`db::open_db_in_memory`.
//! - `SharedSqliteKvStore` checks its connection once, at construction, and
//!   serializes callers on that single connection.

use super::key::prefix_range;
use super::{KvEntry, KvError, KvKey, KvResult, KvStore, Versionstamp};
use crate::db::migrations::latest_version;
use crate::db::open_db;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const ENTRY_SELECT_SQL: &str = "SELECT key, value, versionstamp FROM kv_entries";

/// Key-value store over a borrowed, migrated SQLite connection.
pub struct SqliteKvStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteKvStore<'conn> {
    /// Wraps `conn` after checking that the schema is current.
    ///
    /// # Errors
    /// - `KvError::UninitializedConnection` when `user_version` differs from
    ///   the latest migration.
    /// - `KvError::MissingRequiredTable` when a store table is absent.
    pub fn try_new(conn: &'conn Connection) -> KvResult<Self> {
        ensure_kv_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn begin_write(&self) -> KvResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl KvStore for SqliteKvStore<'_> {
    fn get(&self, key: &KvKey) -> KvResult<Option<KvEntry>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{ENTRY_SELECT_SQL} WHERE key = ?1;"))?;
        let mut rows = stmt.query(params![key.encode()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_entry_row(row)?)),
            None => Ok(None),
        }
    }

    fn list(&self, prefix: &KvKey) -> KvResult<Vec<KvEntry>> {
        let (start, end) = prefix_range(prefix);
        let mut stmt = self.conn.prepare_cached(&format!(
            "{ENTRY_SELECT_SQL} WHERE key >= ?1 AND key < ?2 ORDER BY key ASC;"
        ))?;
        let mut rows = stmt.query(params![start, end])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_entry_row(row)?);
        }
        Ok(entries)
    }

    fn set(&self, key: &KvKey, value: &Value) -> KvResult<Versionstamp> {
        let encoded_value = serde_json::to_string(value)?;
        let tx = self.begin_write()?;
        let versionstamp = next_versionstamp(&tx)?;
        upsert_entry(&tx, &key.encode(), &encoded_value, versionstamp)?;
        tx.commit()?;
        Ok(versionstamp)
    }

    fn delete(&self, key: &KvKey) -> KvResult<()> {
        self.conn.execute(
            "DELETE FROM kv_entries WHERE key = ?1;",
            params![key.encode()],
        )?;
        Ok(())
    }

    fn compare_and_set(
        &self,
        key: &KvKey,
        expected: Option<Versionstamp>,
        value: &Value,
    ) -> KvResult<Option<Versionstamp>> {
        let encoded_key = key.encode();
        let encoded_value = serde_json::to_string(value)?;
        let tx = self.begin_write()?;

        let current = tx
            .query_row(
                "SELECT versionstamp FROM kv_entries WHERE key = ?1;",
                params![encoded_key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(versionstamp_from_db)
            .transpose()?;

        if current != expected {
            // Dropping the transaction rolls it back.
            return Ok(None);
        }

        let versionstamp = next_versionstamp(&tx)?;
        upsert_entry(&tx, &encoded_key, &encoded_value, versionstamp)?;
        tx.commit()?;
        Ok(Some(versionstamp))
    }
}

/// Owned SQLite store for long-lived processes.
///
/// Opened once and shared (usually behind an `Arc`); every operation locks the
/// connection, so statements prepared by one caller are reused by the next.
#[derive(Debug)]
pub struct SharedSqliteKvStore {
    conn: Mutex<Connection>,
}

impl SharedSqliteKvStore {
    /// Opens `path` with [`open_db`] and takes ownership of the connection.
    pub fn open(path: impl AsRef<Path>) -> KvResult<Self> {
        Self::try_new(open_db(path)?)
    }

    /// Takes ownership of a bootstrapped connection.
    ///
    /// # Errors
    /// Same as [`SqliteKvStore::try_new`].
    pub fn try_new(conn: Connection) -> KvResult<Self> {
        ensure_kv_connection_ready(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_store<T>(&self, f: impl FnOnce(&SqliteKvStore<'_>) -> KvResult<T>) -> KvResult<T> {
        let conn = self.lock()?;
        f(&SqliteKvStore { conn: &conn })
    }

    fn lock(&self) -> KvResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| KvError::LockPoisoned)
    }
}

impl KvStore for SharedSqliteKvStore {
    fn get(&self, key: &KvKey) -> KvResult<Option<KvEntry>> {
        self.with_store(|store| store.get(key))
    }

    fn list(&self, prefix: &KvKey) -> KvResult<Vec<KvEntry>> {
        self.with_store(|store| store.list(prefix))
    }

    fn set(&self, key: &KvKey, value: &Value) -> KvResult<Versionstamp> {
        self.with_store(|store| store.set(key, value))
    }

    fn delete(&self, key: &KvKey) -> KvResult<()> {
        self.with_store(|store| store.delete(key))
    }

    fn compare_and_set(
        &self,
        key: &KvKey,
        expected: Option<Versionstamp>,
        value: &Value,
    ) -> KvResult<Option<Versionstamp>> {
        self.with_store(|store| store.compare_and_set(key, expected, value))
    }
}

fn next_versionstamp(conn: &Connection) -> KvResult<Versionstamp> {
    let raw: i64 = conn.query_row(
        "UPDATE kv_meta SET value = value + 1 WHERE name = 'versionstamp' RETURNING value;",
        [],
        |row| row.get(0),
    )?;
    versionstamp_from_db(raw)
}

fn upsert_entry(
    conn: &Connection,
    encoded_key: &[u8],
    encoded_value: &str,
    versionstamp: Versionstamp,
) -> KvResult<()> {
    let stored_versionstamp = i64::try_from(versionstamp)
        .map_err(|_| KvError::InvalidData(format!("versionstamp {versionstamp} overflows")))?;
    conn.execute(
        "INSERT INTO kv_entries (key, value, versionstamp)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            versionstamp = excluded.versionstamp;",
        params![encoded_key, encoded_value, stored_versionstamp],
    )?;
    Ok(())
}

fn parse_entry_row(row: &Row<'_>) -> KvResult<KvEntry> {
    let raw_key: Vec<u8> = row.get("key")?;
    let raw_value: String = row.get("value")?;
    let raw_versionstamp: i64 = row.get("versionstamp")?;

    Ok(KvEntry {
        key: KvKey::decode(&raw_key)?,
        value: serde_json::from_str(&raw_value)?,
        versionstamp: versionstamp_from_db(raw_versionstamp)?,
    })
}

fn versionstamp_from_db(raw: i64) -> KvResult<Versionstamp> {
    Versionstamp::try_from(raw).map_err(|_| {
        KvError::InvalidData(format!("negative versionstamp `{raw}` in kv_entries"))
    })
}

fn ensure_kv_connection_ready(conn: &Connection) -> KvResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(KvError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["kv_entries", "kv_meta"] {
        if !table_exists(conn, table)? {
            return Err(KvError::MissingRequiredTable(table));
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> KvResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
