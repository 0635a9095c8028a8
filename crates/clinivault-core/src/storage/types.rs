//! Core data types for the storage layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cipher::EncryptedBundle;
use crate::error::{Result, VaultError};

/// Persistence tier a collection is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Durable, holds encrypted clinical payloads
    DurableSensitive,
    /// Durable, public data only
    DurableLight,
    /// In-process only, lost on restart
    Ephemeral,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::DurableSensitive, Tier::DurableLight, Tier::Ephemeral];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::DurableSensitive => "durable_sensitive",
            Tier::DurableLight => "durable_light",
            Tier::Ephemeral => "ephemeral",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named category of records with a static sensitivity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Collection {
    Patients,
    Assessments,
    Documents,
    ExerciseLogs,
    Backups,
    AuditLogs,
    Drafts,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Patients,
        Collection::Assessments,
        Collection::Documents,
        Collection::ExerciseLogs,
        Collection::Backups,
        Collection::AuditLogs,
        Collection::Drafts,
    ];

    /// Collections holding clinical data, the default backup scope.
    pub const CLINICAL: [Collection; 4] = [
        Collection::Patients,
        Collection::Assessments,
        Collection::Documents,
        Collection::ExerciseLogs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Patients => "patients",
            Collection::Assessments => "assessments",
            Collection::Documents => "documents",
            Collection::ExerciseLogs => "exerciseLogs",
            Collection::Backups => "backups",
            Collection::AuditLogs => "auditLogs",
            Collection::Drafts => "drafts",
        }
    }

    /// Classification table.
    pub fn tier(&self) -> Tier {
        match self {
            Collection::Patients | Collection::Assessments | Collection::Documents => {
                Tier::DurableSensitive
            }
            Collection::ExerciseLogs | Collection::Backups | Collection::AuditLogs => {
                Tier::DurableLight
            }
            Collection::Drafts => Tier::Ephemeral,
        }
    }

    pub fn is_sensitive(&self) -> bool {
        self.tier() == Tier::DurableSensitive
    }

    /// Records in append-only collections are never overwritten or deleted.
    pub fn is_append_only(&self) -> bool {
        matches!(self, Collection::AuditLogs)
    }

    /// Whether the collection may appear in a backup's data types.
    pub fn is_backupable(&self) -> bool {
        !matches!(self, Collection::Backups | Collection::AuditLogs)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = VaultError;

    fn from_str(value: &str) -> Result<Self> {
        Collection::ALL
            .iter()
            .copied()
            .find(|collection| collection.as_str() == value)
            .ok_or_else(|| VaultError::CollectionUnknown(value.to_string()))
    }
}

/// A keyed, tenant-scoped record as returned by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantScopedRecord {
    /// Unique within its collection for the owning tenant
    pub id: String,

    pub tenant_id: String,

    /// Fields safe to query unencrypted
    pub public_data: serde_json::Value,

    /// Opaque ciphertext, only ever present in sensitive collections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_payload: Option<EncryptedBundle>,

    /// Set by the router on every save
    pub last_modified: DateTime<Utc>,

    /// Starts at 1 and increments on every save of the same key
    pub version: i64,
}

impl TenantScopedRecord {
    /// Whether two records carry the same caller-supplied content.
    ///
    /// Ignores the router-managed `last_modified` and `version` fields.
    pub fn same_content(&self, other: &TenantScopedRecord) -> bool {
        self.id == other.id
            && self.tenant_id == other.tenant_id
            && self.public_data == other.public_data
            && self.encrypted_payload == other.encrypted_payload
    }
}

/// Caller-supplied content of a record.
///
/// Tenant id, modification time and version are deliberately absent: the
/// router always assigns them.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub public_data: serde_json::Value,
    pub encrypted_payload: Option<EncryptedBundle>,
}

impl NewRecord {
    pub fn new(public_data: serde_json::Value) -> Self {
        Self {
            public_data,
            encrypted_payload: None,
        }
    }

    /// Attach a payload already encrypted with [`crate::cipher::Cipher`].
    pub fn with_encrypted_payload(mut self, payload: EncryptedBundle) -> Self {
        self.encrypted_payload = Some(payload);
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted_payload.is_some()
    }
}

impl From<&TenantScopedRecord> for NewRecord {
    fn from(record: &TenantScopedRecord) -> Self {
        Self {
            public_data: record.public_data.clone(),
            encrypted_payload: record.encrypted_payload.clone(),
        }
    }
}

/// Result of a save: the stored record and whether the key was new.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub record: TenantScopedRecord,
    pub created: bool,
}

/// Byte and record counts of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierUsage {
    pub bytes: u64,
    pub records: u64,
}

/// Per-tier usage across all tenants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub durable_sensitive: TierUsage,
    pub durable_light: TierUsage,
    pub ephemeral: TierUsage,
}

impl StorageInfo {
    pub fn tier(&self, tier: Tier) -> TierUsage {
        match tier {
            Tier::DurableSensitive => self.durable_sensitive,
            Tier::DurableLight => self.durable_light,
            Tier::Ephemeral => self.ephemeral,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        Tier::ALL.iter().map(|tier| self.tier(*tier).bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names_round_trip() {
        for collection in Collection::ALL {
            let parsed: Collection = collection.as_str().parse().unwrap();
            assert_eq!(parsed, collection);
            let json = serde_json::to_string(&collection).unwrap();
            assert_eq!(json, format!("\"{}\"", collection.as_str()));
        }
    }

    #[test]
    fn test_unknown_collection_rejected() {
        let result = "invoices".parse::<Collection>();
        assert!(matches!(result, Err(VaultError::CollectionUnknown(name)) if name == "invoices"));
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(Collection::Patients.tier(), Tier::DurableSensitive);
        assert_eq!(Collection::Documents.tier(), Tier::DurableSensitive);
        assert_eq!(Collection::ExerciseLogs.tier(), Tier::DurableLight);
        assert_eq!(Collection::AuditLogs.tier(), Tier::DurableLight);
        assert_eq!(Collection::Drafts.tier(), Tier::Ephemeral);
        assert!(!Collection::Backups.is_backupable());
        assert!(Collection::AuditLogs.is_append_only());
    }

    #[test]
    fn test_new_record_builder() {
        let record = NewRecord::new(serde_json::json!({"name": "A. Silva"}));
        assert!(!record.is_encrypted());
        assert_eq!(record.public_data["name"], "A. Silva");
    }

    #[test]
    fn test_collection_map_keys_serialize_as_names() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(Collection::ExerciseLogs, 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"exerciseLogs":1}"#);
        let back: std::collections::BTreeMap<Collection, i32> =
            serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
