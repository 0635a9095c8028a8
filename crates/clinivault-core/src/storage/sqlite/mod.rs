//! Age-sealed SQLite backing for the durable tiers.
//!
//! Both durable tiers share one SQLite database held in memory, one table per
//! tier. The database can be serialized, sealed with Age and written to disk
//! atomically, then reopened from that file later.

mod row;

use std::fs;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::serialize::OwnedData;
use rusqlite::{Connection, DatabaseName, OptionalExtension};
use tracing::debug;

use crate::cipher::validate_master_key;
use crate::error::{Result, VaultError};
use crate::storage::encryption::{seal_store, unseal_store};
use crate::storage::traits::TierBackend;
use crate::storage::types::{
    Collection, NewRecord, SaveOutcome, TenantScopedRecord, Tier, TierUsage,
};

use row::{RecordRow, RECORD_COLUMNS};

/// On-disk format version of the sealed store.
pub const STORE_FORMAT_VERSION: &str = "1";

const SCHEMA: &str = r#"
    CREATE TABLE meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE sensitive_records (
        collection TEXT NOT NULL,
        tenant_id TEXT NOT NULL,
        id TEXT NOT NULL,
        public_json TEXT NOT NULL,
        payload_json TEXT,
        last_modified TEXT NOT NULL,
        version INTEGER NOT NULL,

        PRIMARY KEY (collection, tenant_id, id)
    );

    CREATE INDEX sensitive_records_tenant
    ON sensitive_records (tenant_id, collection);

    CREATE TABLE light_records (
        collection TEXT NOT NULL,
        tenant_id TEXT NOT NULL,
        id TEXT NOT NULL,
        public_json TEXT NOT NULL,
        payload_json TEXT,
        last_modified TEXT NOT NULL,
        version INTEGER NOT NULL,

        PRIMARY KEY (collection, tenant_id, id)
    );

    CREATE INDEX light_records_tenant
    ON light_records (tenant_id, collection);
"#;

/// In-memory SQLite database backing the durable tiers.
///
/// The connection slot is emptied by [`SqliteDatabase::close`]; every call
/// after that fails with `StorageUnavailable` until [`SqliteDatabase::reinitialize`].
pub struct SqliteDatabase {
    path: Mutex<Option<PathBuf>>,
    conn: Mutex<Option<Connection>>,
}

impl SqliteDatabase {
    /// Create an unsaved database with a fresh schema.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            path: Mutex::new(None),
            conn: Mutex::new(Some(Self::fresh_connection()?)),
        })
    }

    /// Create a new sealed store file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Storage` if the file already exists or cannot be
    /// written, and `VaultError::InvalidInput` for a weak passphrase.
    pub fn create(path: &Path, passphrase: &str) -> Result<()> {
        if path.exists() {
            return Err(VaultError::Storage("Store file already exists".to_string()));
        }

        validate_master_key(passphrase)?;

        let conn = Self::fresh_connection()?;
        let data = conn.serialize(DatabaseName::Main)?;
        let sealed = seal_store(data.as_ref(), passphrase)?;
        Self::write_atomic(path, &sealed)?;
        Ok(())
    }

    /// Open an existing sealed store file.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::StorageUnavailable` if the file is missing or is not
    /// a store image, and `VaultError::DecryptionFailure` for a wrong passphrase.
    pub fn open(path: &Path, passphrase: &str) -> Result<Self> {
        if !path.exists() {
            return Err(VaultError::StorageUnavailable(format!(
                "Store file not found: {}",
                path.display()
            )));
        }

        validate_master_key(passphrase)?;

        let sealed = fs::read(path)?;
        let plaintext = unseal_store(&sealed, passphrase)?;
        let mut conn = Connection::open_in_memory()?;
        let owned_data = Self::owned_data_from_bytes(&plaintext)?;
        conn.deserialize(DatabaseName::Main, owned_data, false)?;

        let format_version: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'format_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| VaultError::StorageUnavailable(format!("Not a store image: {}", e)))?;
        match format_version.as_deref() {
            Some(STORE_FORMAT_VERSION) => {}
            Some(other) => {
                return Err(VaultError::StorageUnavailable(format!(
                    "Unsupported store format version: {}",
                    other
                )))
            }
            None => {
                return Err(VaultError::StorageUnavailable(
                    "Store metadata missing format version".to_string(),
                ))
            }
        }

        Ok(Self {
            path: Mutex::new(Some(path.to_path_buf())),
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Seal the current contents and write them to the file this store was
    /// opened from.
    pub fn persist(&self, passphrase: &str) -> Result<()> {
        let path = self
            .path
            .lock()
            .map_err(|_| VaultError::StorageUnavailable("Store path poisoned".to_string()))?
            .clone()
            .ok_or_else(|| {
                VaultError::Validation("In-memory store has no file to persist to".to_string())
            })?;
        self.persist_to(&path, passphrase)
    }

    /// Seal the current contents and write them to `path`.
    pub fn persist_to(&self, path: &Path, passphrase: &str) -> Result<()> {
        validate_master_key(passphrase)?;
        let sealed = self.with_conn(|conn| {
            let data = conn.serialize(DatabaseName::Main)?;
            seal_store(data.as_ref(), passphrase)
        })?;
        Self::write_atomic(path, &sealed)?;
        debug!(path = %path.display(), bytes = sealed.len(), "persisted sealed store");
        Ok(())
    }

    /// Drop the connection. All later calls fail with `StorageUnavailable`.
    pub fn close(&self) {
        if let Ok(mut slot) = self.conn.lock() {
            slot.take();
        }
    }

    /// Replace this database's contents and file binding with `other`'s,
    /// making it available again.
    pub fn reinitialize(&self, other: SqliteDatabase) -> Result<()> {
        let SqliteDatabase { path, conn } = other;
        let new_conn = conn
            .into_inner()
            .map_err(|_| VaultError::StorageUnavailable("Connection poisoned".to_string()))?;
        let new_path = path
            .into_inner()
            .map_err(|_| VaultError::StorageUnavailable("Store path poisoned".to_string()))?;

        let mut slot = self.lock_slot()?;
        *slot = new_conn;
        if let Ok(mut current) = self.path.lock() {
            *current = new_path;
        }
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.conn.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Run `f` against the live connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut slot = self.lock_slot()?;
        let conn = slot
            .as_mut()
            .ok_or_else(|| VaultError::StorageUnavailable("Store is closed".to_string()))?;
        f(conn)
    }

    fn lock_slot(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| VaultError::StorageUnavailable("SQLite connection poisoned".to_string()))
    }

    fn fresh_connection() -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        let created_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?, ?)",
            ["format_version", STORE_FORMAT_VERSION],
        )?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?, ?)",
            ["created_at", &created_at],
        )?;
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?, ?)",
            ["last_modified", &created_at],
        )?;
        Ok(conn)
    }

    fn owned_data_from_bytes(bytes: &[u8]) -> Result<OwnedData> {
        if bytes.is_empty() {
            return Err(VaultError::StorageUnavailable(
                "SQLite payload is empty".to_string(),
            ));
        }

        let size: i32 = bytes
            .len()
            .try_into()
            .map_err(|_| VaultError::Storage("SQLite payload too large".to_string()))?;

        // SAFETY: sqlite3_malloc returns a valid pointer or null; null is
        // rejected below. The size has been validated to fit in i32.
        let raw = unsafe { rusqlite::ffi::sqlite3_malloc(size) as *mut u8 };
        if raw.is_null() {
            return Err(VaultError::Storage("SQLite allocation failed".to_string()));
        }

        // SAFETY:
        // - `raw` is non-null and writable for `bytes.len()` bytes (allocated above)
        // - `bytes` is valid for reads of `bytes.len()` bytes and does not overlap `raw`
        // - `OwnedData::from_raw_nonnull` takes ownership of the sqlite3_malloc'd buffer
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), raw, bytes.len());
            let ptr = NonNull::new(raw).ok_or_else(|| {
                VaultError::Storage("SQLite allocation returned null".to_string())
            })?;
            Ok(OwnedData::from_raw_nonnull(ptr, bytes.len()))
        }
    }

    fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        crate::fs::write_atomic(path, data)
            .map_err(|e| VaultError::Storage(format!("Atomic write failed: {}", e)))
    }
}

/// One durable tier: a table in the shared [`SqliteDatabase`].
pub struct SqliteTier {
    db: Arc<SqliteDatabase>,
    tier: Tier,
}

impl SqliteTier {
    /// # Errors
    ///
    /// Returns `VaultError::Validation` for the ephemeral tier, which has no table.
    pub fn new(db: Arc<SqliteDatabase>, tier: Tier) -> Result<Self> {
        if tier == Tier::Ephemeral {
            return Err(VaultError::Validation(
                "Ephemeral tier is not backed by SQLite".to_string(),
            ));
        }
        Ok(Self { db, tier })
    }

    fn table(&self) -> &'static str {
        match self.tier {
            Tier::DurableSensitive => "sensitive_records",
            _ => "light_records",
        }
    }
}

impl TierBackend for SqliteTier {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn fetch(
        &self,
        collection: Collection,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<TenantScopedRecord>> {
        let query = format!(
            "SELECT {} FROM {} WHERE collection = ? AND tenant_id = ? AND id = ?",
            RECORD_COLUMNS,
            self.table()
        );
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    &query,
                    (collection.as_str(), tenant_id, id),
                    RecordRow::from_row,
                )
                .optional()?;
            row.map(TenantScopedRecord::try_from).transpose()
        })
    }

    fn fetch_all(
        &self,
        collection: Collection,
        tenant_id: &str,
    ) -> Result<Vec<TenantScopedRecord>> {
        // Served by the (collection, tenant_id, id) primary key; no full scan.
        let query = format!(
            "SELECT {} FROM {} WHERE collection = ? AND tenant_id = ? ORDER BY id",
            RECORD_COLUMNS,
            self.table()
        );
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&query)?;
            let rows = stmt.query_map((collection.as_str(), tenant_id), RecordRow::from_row)?;

            let mut records = Vec::new();
            for row in rows {
                records.push(row?.try_into()?);
            }
            Ok(records)
        })
    }

    fn upsert(
        &self,
        collection: Collection,
        tenant_id: &str,
        id: &str,
        record: &NewRecord,
        at: DateTime<Utc>,
    ) -> Result<SaveOutcome> {
        let public_json = serde_json::to_string(&record.public_data)
            .map_err(|e| VaultError::Storage(format!("Failed to serialize public data: {}", e)))?;
        let payload_json = record
            .encrypted_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| VaultError::Storage(format!("Failed to serialize payload: {}", e)))?;
        let table = self.table();

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;

            let previous: Option<i64> = tx
                .query_row(
                    &format!(
                        "SELECT version FROM {} WHERE collection = ? AND tenant_id = ? AND id = ?",
                        table
                    ),
                    (collection.as_str(), tenant_id, id),
                    |row| row.get(0),
                )
                .optional()?;
            let version = previous.map_or(1, |v| v + 1);

            tx.execute(
                &format!(
                    r#"
                    INSERT INTO {} (
                        collection,
                        tenant_id,
                        id,
                        public_json,
                        payload_json,
                        last_modified,
                        version
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT (collection, tenant_id, id) DO UPDATE SET
                        public_json = excluded.public_json,
                        payload_json = excluded.payload_json,
                        last_modified = excluded.last_modified,
                        version = excluded.version
                    "#,
                    table
                ),
                (
                    collection.as_str(),
                    tenant_id,
                    id,
                    &public_json,
                    &payload_json,
                    at.to_rfc3339(),
                    version,
                ),
            )?;

            tx.execute(
                "UPDATE meta SET value = ? WHERE key = 'last_modified'",
                [at.to_rfc3339()],
            )?;

            tx.commit()?;

            Ok(SaveOutcome {
                record: TenantScopedRecord {
                    id: id.to_string(),
                    tenant_id: tenant_id.to_string(),
                    public_data: record.public_data.clone(),
                    encrypted_payload: record.encrypted_payload.clone(),
                    last_modified: at,
                    version,
                },
                created: previous.is_none(),
            })
        })
    }

    fn remove(&self, collection: Collection, tenant_id: &str, id: &str) -> Result<bool> {
        let query = format!(
            "DELETE FROM {} WHERE collection = ? AND tenant_id = ? AND id = ?",
            self.table()
        );
        self.db.with_conn(|conn| {
            let removed = conn.execute(&query, (collection.as_str(), tenant_id, id))?;
            Ok(removed > 0)
        })
    }

    fn remove_tenant(&self, collections: &[Collection], tenant_id: &str) -> Result<usize> {
        if collections.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; collections.len()].join(", ");
        let query = format!(
            "DELETE FROM {} WHERE tenant_id = ? AND collection IN ({})",
            self.table(),
            placeholders
        );
        let mut params: Vec<&str> = Vec::with_capacity(collections.len() + 1);
        params.push(tenant_id);
        params.extend(collections.iter().map(|c| c.as_str()));

        self.db.with_conn(|conn| {
            let removed = conn.execute(&query, rusqlite::params_from_iter(params.iter()))?;
            Ok(removed)
        })
    }

    fn usage(&self) -> Result<TierUsage> {
        let query = format!(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(CAST(public_json AS BLOB)) + COALESCE(LENGTH(CAST(payload_json AS BLOB)), 0)), 0) FROM {}",
            self.table()
        );
        self.db.with_conn(|conn| {
            let (records, bytes): (i64, i64) =
                conn.query_row(&query, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(TierUsage {
                bytes: bytes.max(0) as u64,
                records: records.max(0) as u64,
            })
        })
    }
}
