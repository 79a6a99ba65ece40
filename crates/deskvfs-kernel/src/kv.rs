//! Key/value persistence.
//!
//! Small named tables of byte values. The storage configuration keeps its
//! default mount set here; [`SqliteKv`] persists it across restarts and
//! [`MemoryKv`] backs tests.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Key/value store errors.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type KvResult<T> = Result<T, KvError>;

/// Named tables of byte values.
pub trait KvStore: Send + Sync {
    /// Value stored under `key`, if any.
    fn get(&self, table: &str, key: &str) -> KvResult<Option<Vec<u8>>>;

    /// Insert or replace.
    fn put(&self, table: &str, key: &str, value: &[u8]) -> KvResult<()>;

    /// Remove a key. Returns whether it existed.
    fn delete(&self, table: &str, key: &str) -> KvResult<bool>;

    /// Every entry whose key starts with `prefix`, ordered by key.
    fn list(&self, table: &str, prefix: &str) -> KvResult<Vec<(String, Vec<u8>)>>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryKv {
    tables: RwLock<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, table: &str, key: &str) -> KvResult<Option<Vec<u8>>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|t| t.get(key))
            .cloned())
    }

    fn put(&self, table: &str, key: &str, value: &[u8]) -> KvResult<()> {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, table: &str, key: &str) -> KvResult<bool> {
        Ok(self
            .tables
            .write()
            .get_mut(table)
            .and_then(|t| t.remove(key))
            .is_some())
    }

    fn list(&self, table: &str, prefix: &str) -> KvResult<Vec<(String, Vec<u8>)>> {
        let tables = self.tables.read();
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(t.range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    tbl TEXT NOT NULL,
    key TEXT NOT NULL,
    value BLOB NOT NULL,
    updated_at INTEGER DEFAULT (unixepoch()),
    PRIMARY KEY (tbl, key)
);
"#;

/// SQLite-backed store.
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKv").finish_non_exhaustive()
    }
}

impl SqliteKv {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> KvResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> KvResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl KvStore for SqliteKv {
    fn get(&self, table: &str, key: &str) -> KvResult<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE tbl = ?1 AND key = ?2",
                params![table, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, table: &str, key: &str, value: &[u8]) -> KvResult<()> {
        self.conn.lock().execute(
            "INSERT INTO kv (tbl, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (tbl, key) DO UPDATE SET value = excluded.value, updated_at = unixepoch()",
            params![table, key, value],
        )?;
        Ok(())
    }

    fn delete(&self, table: &str, key: &str) -> KvResult<bool> {
        let n = self.conn.lock().execute(
            "DELETE FROM kv WHERE tbl = ?1 AND key = ?2",
            params![table, key],
        )?;
        Ok(n > 0)
    }

    fn list(&self, table: &str, prefix: &str) -> KvResult<Vec<(String, Vec<u8>)>> {
        let conn = self.conn.lock();
        // substr keeps `%` and `_` in prefixes literal.
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv
             WHERE tbl = ?1 AND substr(key, 1, length(?2)) = ?2
             ORDER BY key",
        )?;
        let rows = stmt.query_map(params![table, prefix], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
