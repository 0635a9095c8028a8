//! Append-only audit trail.
//!
//! Entries record who touched which record and a hash of the record at that
//! moment, never the record itself. They are stored in the `auditLogs`
//! collection, which the router treats as append-only.
//!
//! Appending is best-effort: a failed append is reported as
//! [`AuditOutcome::Degraded`] and logged at `warn`, but never undoes or fails
//! the operation that triggered it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::cipher::Cipher;
use crate::error::{Result, VaultError};
use crate::storage::{Collection, NewRecord, StorageRouter, TenantScopedRecord};

/// Kind of access being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    View,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::View => "VIEW",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = VaultError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(AuditAction::Create),
            "VIEW" => Ok(AuditAction::View),
            "UPDATE" => Ok(AuditAction::Update),
            "DELETE" => Ok(AuditAction::Delete),
            other => Err(VaultError::InvalidInput(format!(
                "Unknown audit action: {}",
                other
            ))),
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub tenant_id: String,
    /// Hash of the record at the time of the action, never its plaintext
    pub data_hash: Option<String>,
    /// Set when the entity holds clinical data subject to compliance review
    pub compliance_flag: bool,
}

/// What an audit entry is about.
#[derive(Debug, Clone)]
pub struct AuditSubject {
    pub entity_type: String,
    pub entity_id: String,
    pub data_hash: Option<String>,
    pub compliance_flag: bool,
}

impl AuditSubject {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            data_hash: None,
            compliance_flag: false,
        }
    }

    /// Subject for a record of `collection`; flagged when the collection is sensitive.
    pub fn record(collection: Collection, entity_id: impl Into<String>) -> Self {
        Self {
            compliance_flag: collection.is_sensitive(),
            ..Self::new(collection.as_str(), entity_id)
        }
    }

    pub fn with_hash(mut self, data_hash: impl Into<String>) -> Self {
        self.data_hash = Some(data_hash.into());
        self
    }

    pub fn with_compliance_flag(mut self, flag: bool) -> Self {
        self.compliance_flag = flag;
        self
    }
}

/// Result of a best-effort append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    /// Entry stored under this id
    Recorded(String),
    /// Entry could not be stored; the triggering operation still succeeded
    Degraded(String),
}

impl AuditOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, AuditOutcome::Degraded(_))
    }

    /// Warning text for monitoring, if the append failed.
    pub fn warning(&self) -> Option<&str> {
        match self {
            AuditOutcome::Degraded(reason) => Some(reason),
            AuditOutcome::Recorded(_) => None,
        }
    }
}

/// Filter for querying audit entries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub user_id: Option<String>,
    /// Start time (inclusive)
    pub since: Option<DateTime<Utc>>,
    /// End time (inclusive)
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn since(mut self, date: DateTime<Utc>) -> Self {
        self.since = Some(date);
        self
    }

    pub fn until(mut self, date: DateTime<Utc>) -> Self {
        self.until = Some(date);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.map_or(true, |a| entry.action == a)
            && self
                .entity_type
                .as_ref()
                .map_or(true, |t| &entry.entity_type == t)
            && self
                .entity_id
                .as_ref()
                .map_or(true, |id| &entry.entity_id == id)
            && self.user_id.as_ref().map_or(true, |u| &entry.user_id == u)
            && self.since.map_or(true, |s| entry.timestamp >= s)
            && self.until.map_or(true, |u| entry.timestamp <= u)
    }
}

/// Audit log writing through the storage router.
pub struct AuditLog {
    storage: Arc<StorageRouter>,
    cipher: Arc<Cipher>,
}

impl AuditLog {
    pub fn new(storage: Arc<StorageRouter>, cipher: Arc<Cipher>) -> Self {
        Self { storage, cipher }
    }

    /// Content fingerprint of a record for `data_hash`.
    pub fn fingerprint(&self, record: &TenantScopedRecord) -> String {
        match serde_json::to_vec(record) {
            Ok(bytes) => self.cipher.hash(&bytes).digest,
            Err(_) => String::new(),
        }
    }

    /// Append an entry. Never fails; see [`AuditOutcome`].
    pub fn record(
        &self,
        action: AuditAction,
        user_id: &str,
        tenant_id: &str,
        subject: AuditSubject,
    ) -> AuditOutcome {
        let entry = AuditEntry {
            id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            user_id: user_id.to_string(),
            action,
            entity_type: subject.entity_type,
            entity_id: subject.entity_id,
            tenant_id: tenant_id.to_string(),
            data_hash: subject.data_hash,
            compliance_flag: subject.compliance_flag,
        };

        match self.append(&entry) {
            Ok(()) => AuditOutcome::Recorded(entry.id),
            Err(err) => {
                warn!(
                    tenant = tenant_id,
                    action = %action,
                    entity_type = %entry.entity_type,
                    error = %err,
                    "audit append failed"
                );
                AuditOutcome::Degraded(format!("Audit append failed: {}", err))
            }
        }
    }

    fn append(&self, entry: &AuditEntry) -> Result<()> {
        let public_data = serde_json::to_value(entry)?;
        self.storage.save(
            Collection::AuditLogs,
            &entry.id,
            &NewRecord::new(public_data),
            &entry.tenant_id,
            false,
        )?;
        Ok(())
    }

    /// Entries of one tenant matching `filter`, newest first.
    pub fn query(&self, tenant_id: &str, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        for record in self.storage.get_all(Collection::AuditLogs, tenant_id)? {
            let entry: AuditEntry = serde_json::from_value(record.public_data).map_err(|e| {
                VaultError::Validation(format!("Malformed audit entry {}: {}", record.id, e))
            })?;
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }

        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::KdfParams;

    fn audit_log() -> (AuditLog, Arc<StorageRouter>) {
        let storage = Arc::new(StorageRouter::in_memory().unwrap());
        let cipher = Arc::new(Cipher::new(KdfParams::insecure_fast()));
        (AuditLog::new(Arc::clone(&storage), cipher), storage)
    }

    #[test]
    fn test_record_and_query() {
        let (log, _) = audit_log();
        let outcome = log.record(
            AuditAction::Create,
            "dr-lima",
            "t1",
            AuditSubject::record(Collection::Patients, "p1").with_hash("abc"),
        );
        assert!(matches!(outcome, AuditOutcome::Recorded(_)));

        let entries = log.query("t1", &AuditFilter::new()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Create);
        assert_eq!(entries[0].entity_type, "patients");
        assert_eq!(entries[0].data_hash.as_deref(), Some("abc"));
        assert!(entries[0].compliance_flag);
        assert!(log.query("t2", &AuditFilter::new()).unwrap().is_empty());
    }

    #[test]
    fn test_query_filters_and_orders_newest_first() {
        let (log, _) = audit_log();
        log.record(
            AuditAction::Create,
            "u1",
            "t1",
            AuditSubject::record(Collection::Patients, "p1"),
        );
        log.record(
            AuditAction::View,
            "u2",
            "t1",
            AuditSubject::record(Collection::Patients, "p1"),
        );
        log.record(
            AuditAction::View,
            "u2",
            "t1",
            AuditSubject::record(Collection::ExerciseLogs, "l1"),
        );

        let views = log
            .query("t1", &AuditFilter::new().action(AuditAction::View))
            .unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].entity_id, "l1");
        assert!(!views[0].compliance_flag);

        let by_user = log.query("t1", &AuditFilter::new().user("u1")).unwrap();
        assert_eq!(by_user.len(), 1);

        let limited = log.query("t1", &AuditFilter::new().limit(1)).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].entity_id, "l1");
    }

    #[test]
    fn test_failed_append_degrades() {
        let (log, storage) = audit_log();
        storage.close();

        let outcome = log.record(
            AuditAction::Delete,
            "u1",
            "t1",
            AuditSubject::new("patients", "p1"),
        );
        assert!(outcome.is_degraded());
        assert!(outcome.warning().unwrap().contains("Storage unavailable"));
    }

    #[test]
    fn test_action_wire_format() {
        assert_eq!(
            serde_json::to_string(&AuditAction::Update).unwrap(),
            "\"UPDATE\""
        );
        assert_eq!("view".parse::<AuditAction>().unwrap(), AuditAction::View);
        assert!("PURGE".parse::<AuditAction>().is_err());
    }
}
