//! Record row type for database queries.

use chrono::{DateTime, Utc};

use crate::cipher::EncryptedBundle;
use crate::error::{Result, VaultError};
use crate::storage::types::TenantScopedRecord;

/// Column list matching [`RecordRow::from_row`].
pub const RECORD_COLUMNS: &str =
    "id, tenant_id, public_json, payload_json, last_modified, version";

/// Raw row data from a record table, before parsing into domain types.
#[derive(Debug)]
pub struct RecordRow {
    pub id: String,
    pub tenant_id: String,
    pub public_json: String,
    pub payload_json: Option<String>,
    pub last_modified: String,
    pub version: i64,
}

impl RecordRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            public_json: row.get(2)?,
            payload_json: row.get(3)?,
            last_modified: row.get(4)?,
            version: row.get(5)?,
        })
    }
}

impl TryFrom<RecordRow> for TenantScopedRecord {
    type Error = VaultError;

    fn try_from(row: RecordRow) -> Result<Self> {
        let last_modified = DateTime::parse_from_rfc3339(&row.last_modified)
            .map_err(|e| VaultError::Storage(format!("Invalid timestamp: {}", e)))?
            .with_timezone(&Utc);
        let public_data: serde_json::Value = serde_json::from_str(&row.public_json)
            .map_err(|e| VaultError::Storage(format!("Invalid public JSON: {}", e)))?;
        let encrypted_payload = row
            .payload_json
            .as_ref()
            .map(|s| {
                serde_json::from_str::<EncryptedBundle>(s)
                    .map_err(|e| VaultError::Storage(format!("Invalid payload JSON: {}", e)))
            })
            .transpose()?;

        Ok(TenantScopedRecord {
            id: row.id,
            tenant_id: row.tenant_id,
            public_data,
            encrypted_payload,
            last_modified,
            version: row.version,
        })
    }
}
