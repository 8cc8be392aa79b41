//! SQLite-backed store
//!
//! Layout:
//! - `memo_fingerprints (computation_id TEXT PRIMARY KEY, fingerprint TEXT)`
//! - one `memo_ns_<hex(namespace)> (key TEXT PRIMARY KEY, value BLOB)` table per namespace
//!
//! SQLite folds ASCII case in table names while namespaces are case
//! sensitive, so the name is hex-encoded into the table name.

use crate::error::{MemoError, Result};
use crate::memo::config::{StoreConfig, StoreLocation};
use crate::memo::invalidation::{Fingerprint, Reconciliation};
use crate::memo::store::{Namespace, PersistenceStore};
use crate::memo::types::StoredEntry;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// [`PersistenceStore`] on a single SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
    location: StoreLocation,
}

impl SqliteStore {
    /// Open (or create) the store described by `config`
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = match &config.location {
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        MemoError::StoreUnavailable(format!(
                            "Failed to create directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }

                let conn = Connection::open(path).map_err(|e| {
                    MemoError::StoreUnavailable(format!(
                        "Failed to open database {}: {}",
                        path.display(),
                        e
                    ))
                })?;

                conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
                    .map_err(|e| {
                        MemoError::StoreUnavailable(format!("Failed to set pragmas: {}", e))
                    })?;
                conn
            }
            StoreLocation::InMemory => Connection::open_in_memory().map_err(|e| {
                MemoError::StoreUnavailable(format!(
                    "Failed to create in-memory database: {}",
                    e
                ))
            })?,
        };

        conn.busy_timeout(config.busy_timeout).map_err(|e| {
            MemoError::StoreUnavailable(format!("Failed to set busy timeout: {}", e))
        })?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memo_fingerprints (
                computation_id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL
            );",
        )
        .map_err(|e| MemoError::StoreUnavailable(format!("Failed to initialize schema: {}", e)))?;

        info!("Opened memo store at {}", config.location);

        Ok(Self {
            conn: Mutex::new(conn),
            location: config.location.clone(),
        })
    }

    /// Open a database file with default settings
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&StoreConfig::file(path))
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MemoError::Other("Lock poisoned".to_string()))
    }
}

fn table_name(namespace: &Namespace) -> String {
    let mut name = String::from("memo_ns_");
    for b in namespace.as_str().bytes() {
        name.push_str(&format!("{:02x}", b));
    }
    name
}

fn create_table_sql(namespace: &Namespace) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" (key TEXT PRIMARY KEY, value BLOB NOT NULL);",
        table_name(namespace)
    )
}

fn table_exists(conn: &Connection, namespace: &Namespace) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table_name(namespace)],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

impl PersistenceStore for SqliteStore {
    fn load_all(&self, namespace: &Namespace) -> Result<Vec<StoredEntry>> {
        let conn = self.lock()?;
        if !table_exists(&conn, namespace)? {
            debug!("No table yet for {}", namespace);
            return Ok(Vec::new());
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT key, value FROM \"{}\" ORDER BY key",
            table_name(namespace)
        ))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    fn upsert_many(&self, namespace: &Namespace, entries: &[StoredEntry]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(&create_table_sql(namespace))?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO \"{}\" (key, value) VALUES (?1, ?2)",
                table_name(namespace)
            ))?;
            for (key, value) in entries {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;

        debug!("Upserted {} rows into {}", entries.len(), namespace);
        Ok(())
    }

    fn drop_namespace(&self, namespace: &Namespace) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS \"{}\";",
            table_name(namespace)
        ))?;
        Ok(())
    }

    fn forget_namespace(&self, namespace: &Namespace) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS \"{}\";",
            table_name(namespace)
        ))?;
        tx.execute(
            "DELETE FROM memo_fingerprints WHERE computation_id = ?1",
            params![namespace.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_fingerprint(&self, computation_id: &str) -> Result<Option<Fingerprint>> {
        let conn = self.lock()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT fingerprint FROM memo_fingerprints WHERE computation_id = ?1",
                params![computation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(stored.map(Fingerprint::from_hex))
    }

    fn set_fingerprint(&self, computation_id: &str, fingerprint: &Fingerprint) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO memo_fingerprints (computation_id, fingerprint) VALUES (?1, ?2)",
            params![computation_id, fingerprint.as_str()],
        )?;
        Ok(())
    }

    fn reconcile_fingerprint(
        &self,
        namespace: &Namespace,
        fingerprint: &Fingerprint,
    ) -> Result<Reconciliation> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT fingerprint FROM memo_fingerprints WHERE computation_id = ?1",
                params![namespace.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match stored {
            Some(stored) if stored == fingerprint.as_str() => {
                tx.execute_batch(&create_table_sql(namespace))?;
                Reconciliation::Unchanged
            }
            Some(_) => {
                tx.execute_batch(&format!(
                    "DROP TABLE IF EXISTS \"{}\";",
                    table_name(namespace)
                ))?;
                tx.execute_batch(&create_table_sql(namespace))?;
                tx.execute(
                    "UPDATE memo_fingerprints SET fingerprint = ?1 WHERE computation_id = ?2",
                    params![fingerprint.as_str(), namespace.as_str()],
                )?;
                Reconciliation::Invalidated
            }
            None => {
                tx.execute_batch(&create_table_sql(namespace))?;
                tx.execute(
                    "INSERT INTO memo_fingerprints (computation_id, fingerprint) VALUES (?1, ?2)",
                    params![namespace.as_str(), fingerprint.as_str()],
                )?;
                Reconciliation::Unchanged
            }
        };

        tx.commit()?;
        Ok(outcome)
    }
}
