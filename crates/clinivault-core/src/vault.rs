//! The per-process service context.
//!
//! `ClinicVault` owns one instance of each service and wires them together:
//! record operations go through the router and are mirrored into the audit
//! log, backup operations go through the engine. Construct it once and pass
//! it by reference.

use std::sync::Arc;

use secrecy::SecretString;
use serde_json::Value;

use crate::audit::{AuditAction, AuditLog, AuditOutcome, AuditSubject};
use crate::backup::{BackupEngine, BackupScheduler, RestoreOptions, RestoreReport};
use crate::cipher::{Cipher, KdfParams};
use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::storage::{Collection, NewRecord, StorageRouter, TenantScopedRecord};

/// Entity type of audit entries about backups.
pub const BACKUP_ENTITY: &str = "backup";

/// Entity type of audit entries about whole tenants.
pub const TENANT_ENTITY: &str = "tenant";

/// A result together with the outcome of its audit append.
#[derive(Debug, Clone)]
pub struct Audited<T> {
    pub value: T,
    /// `None` when nothing auditable happened (e.g. a lookup that found nothing)
    pub audit: Option<AuditOutcome>,
}

impl<T> Audited<T> {
    fn new(value: T, audit: Option<AuditOutcome>) -> Self {
        Self { value, audit }
    }

    /// Warning to surface when the audit append failed.
    pub fn audit_warning(&self) -> Option<&str> {
        self.audit.as_ref().and_then(AuditOutcome::warning)
    }
}

pub struct ClinicVault {
    cipher: Arc<Cipher>,
    storage: Arc<StorageRouter>,
    audit: Arc<AuditLog>,
    backups: Arc<BackupEngine>,
}

impl ClinicVault {
    pub fn new(cipher: Arc<Cipher>, storage: Arc<StorageRouter>) -> Self {
        let audit = Arc::new(AuditLog::new(Arc::clone(&storage), Arc::clone(&cipher)));
        let backups = Arc::new(BackupEngine::new(Arc::clone(&storage), Arc::clone(&cipher)));
        Self {
            cipher,
            storage,
            audit,
            backups,
        }
    }

    /// Vault over an unsaved in-memory store.
    pub fn in_memory(params: KdfParams) -> Result<Self> {
        Ok(Self::new(
            Arc::new(Cipher::new(params)),
            Arc::new(StorageRouter::in_memory()?),
        ))
    }

    /// Build the vault described by `config`, opening its sealed store with
    /// `master_key` and applying every `[[backup]]` policy.
    pub fn from_config(config: &VaultConfig, master_key: &str) -> Result<Self> {
        config.validate()?;
        let storage = match &config.store.path {
            Some(path) => StorageRouter::open(path, master_key)?,
            None => StorageRouter::in_memory()?,
        };
        let vault = Self::new(Arc::new(Cipher::new(config.cipher)), Arc::new(storage));
        for backup in config.backup_configs()? {
            vault.backups.configure_backup(backup)?;
        }
        Ok(vault)
    }

    pub fn cipher(&self) -> &Arc<Cipher> {
        &self.cipher
    }

    pub fn storage(&self) -> &Arc<StorageRouter> {
        &self.storage
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn backups(&self) -> &Arc<BackupEngine> {
        &self.backups
    }

    /// Seal the durable store back to its file.
    pub fn persist(&self, master_key: &str) -> Result<()> {
        self.storage.persist(master_key)
    }

    /// Scheduler over this vault's backup engine.
    pub fn scheduler(&self, master_key: SecretString) -> BackupScheduler {
        BackupScheduler::new(Arc::clone(&self.backups), master_key)
    }

    /// Save a record and audit it as CREATE or UPDATE.
    pub fn save_record(
        &self,
        user_id: &str,
        tenant_id: &str,
        collection: Collection,
        key: &str,
        record: NewRecord,
    ) -> Result<Audited<TenantScopedRecord>> {
        let outcome = self
            .storage
            .save(collection, key, &record, tenant_id, record.is_encrypted())?;
        let action = if outcome.created {
            AuditAction::Create
        } else {
            AuditAction::Update
        };
        let audit = self.audit.record(
            action,
            user_id,
            tenant_id,
            AuditSubject::record(collection, key)
                .with_hash(self.audit.fingerprint(&outcome.record)),
        );
        Ok(Audited::new(outcome.record, Some(audit)))
    }

    /// Encrypt `plaintext` under `master_key` and save it as the record's
    /// payload next to `public_data`.
    #[allow(clippy::too_many_arguments)]
    pub fn save_sensitive(
        &self,
        user_id: &str,
        tenant_id: &str,
        collection: Collection,
        key: &str,
        public_data: Value,
        plaintext: &[u8],
        master_key: &str,
    ) -> Result<Audited<TenantScopedRecord>> {
        if !collection.is_sensitive() {
            return Err(VaultError::Validation(format!(
                "Collection {} does not accept encrypted payloads",
                collection
            )));
        }
        let payload = self.cipher.seal(plaintext, master_key)?;
        self.save_record(
            user_id,
            tenant_id,
            collection,
            key,
            NewRecord::new(public_data).with_encrypted_payload(payload),
        )
    }

    /// Get a record, auditing a VIEW when it exists for this tenant.
    pub fn get_record(
        &self,
        user_id: &str,
        tenant_id: &str,
        collection: Collection,
        key: &str,
    ) -> Result<Audited<Option<TenantScopedRecord>>> {
        let record = self.storage.get(collection, key, tenant_id)?;
        let audit = record.as_ref().map(|r| {
            self.audit.record(
                AuditAction::View,
                user_id,
                tenant_id,
                AuditSubject::record(collection, key).with_hash(self.audit.fingerprint(r)),
            )
        });
        Ok(Audited::new(record, audit))
    }

    /// Decrypt a record's payload.
    pub fn open_payload(&self, record: &TenantScopedRecord, master_key: &str) -> Result<Vec<u8>> {
        let payload = record.encrypted_payload.as_ref().ok_or_else(|| {
            VaultError::Validation(format!("Record {} has no encrypted payload", record.id))
        })?;
        self.cipher.open(payload, master_key)
    }

    /// List a collection, auditing one VIEW of the whole collection.
    pub fn list_records(
        &self,
        user_id: &str,
        tenant_id: &str,
        collection: Collection,
    ) -> Result<Audited<Vec<TenantScopedRecord>>> {
        let records = self.storage.get_all(collection, tenant_id)?;
        let audit = self.audit.record(
            AuditAction::View,
            user_id,
            tenant_id,
            AuditSubject::record(collection, "*"),
        );
        Ok(Audited::new(records, Some(audit)))
    }

    /// Delete a record, auditing a DELETE when something was removed.
    pub fn delete_record(
        &self,
        user_id: &str,
        tenant_id: &str,
        collection: Collection,
        key: &str,
    ) -> Result<Audited<bool>> {
        let existing = self.storage.get(collection, key, tenant_id)?;
        let removed = self.storage.delete(collection, key, tenant_id)?;
        let audit = match existing {
            Some(record) if removed => Some(self.audit.record(
                AuditAction::Delete,
                user_id,
                tenant_id,
                AuditSubject::record(collection, key)
                    .with_hash(self.audit.fingerprint(&record)),
            )),
            _ => None,
        };
        Ok(Audited::new(removed, audit))
    }

    /// Erase all of a tenant's records except its audit trail.
    pub fn purge_tenant(&self, user_id: &str, tenant_id: &str) -> Result<Audited<usize>> {
        let removed = self.storage.clear_tenant_data(tenant_id)?;
        let audit = self.audit.record(
            AuditAction::Delete,
            user_id,
            tenant_id,
            AuditSubject::new(TENANT_ENTITY, tenant_id).with_compliance_flag(true),
        );
        Ok(Audited::new(removed, Some(audit)))
    }

    pub async fn create_full_backup(
        &self,
        user_id: &str,
        tenant_id: &str,
        master_key: &str,
        description: Option<&str>,
    ) -> Result<Audited<String>> {
        let id = self
            .backups
            .create_full_backup(tenant_id, master_key, description)
            .await?;
        let audit = self.audit_backup(AuditAction::Create, user_id, tenant_id, &id);
        Ok(Audited::new(id, Some(audit)))
    }

    /// Incremental backup; audited only when a new backup was created.
    pub async fn create_incremental_backup(
        &self,
        user_id: &str,
        tenant_id: &str,
        master_key: &str,
        last_backup_id: &str,
    ) -> Result<Audited<String>> {
        let id = self
            .backups
            .create_incremental_backup(tenant_id, master_key, last_backup_id)
            .await?;
        let audit = (id != last_backup_id)
            .then(|| self.audit_backup(AuditAction::Create, user_id, tenant_id, &id));
        Ok(Audited::new(id, audit))
    }

    pub async fn create_differential_backup(
        &self,
        user_id: &str,
        tenant_id: &str,
        master_key: &str,
    ) -> Result<Audited<String>> {
        let before = self.backups.get_backup_statistics(tenant_id)?.total_backups;
        let id = self
            .backups
            .create_differential_backup(tenant_id, master_key)
            .await?;
        let created = self.backups.get_backup_statistics(tenant_id)?.total_backups > before;
        let audit =
            created.then(|| self.audit_backup(AuditAction::Create, user_id, tenant_id, &id));
        Ok(Audited::new(id, audit))
    }

    pub async fn restore_from_backup(
        &self,
        user_id: &str,
        backup_id: &str,
        tenant_id: &str,
        master_key: &str,
        options: RestoreOptions,
    ) -> Result<Audited<RestoreReport>> {
        let report = self
            .backups
            .restore_from_backup(backup_id, tenant_id, master_key, options)
            .await?;
        let audit = self.audit_backup(AuditAction::Update, user_id, tenant_id, backup_id);
        Ok(Audited::new(report, Some(audit)))
    }

    pub async fn delete_backup(
        &self,
        user_id: &str,
        tenant_id: &str,
        backup_id: &str,
    ) -> Result<Audited<()>> {
        self.backups.delete_backup(tenant_id, backup_id).await?;
        let audit = self.audit_backup(AuditAction::Delete, user_id, tenant_id, backup_id);
        Ok(Audited::new((), Some(audit)))
    }

    fn audit_backup(
        &self,
        action: AuditAction,
        user_id: &str,
        tenant_id: &str,
        backup_id: &str,
    ) -> AuditOutcome {
        self.audit.record(
            action,
            user_id,
            tenant_id,
            AuditSubject::new(BACKUP_ENTITY, backup_id).with_compliance_flag(true),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditFilter;
    use serde_json::json;

    const KEY: &str = "clinic-master-key";

    fn vault() -> ClinicVault {
        ClinicVault::in_memory(KdfParams::insecure_fast()).unwrap()
    }

    #[test]
    fn test_save_audits_create_then_update() {
        let vault = vault();
        let first = vault
            .save_record(
                "u1",
                "t1",
                Collection::ExerciseLogs,
                "l1",
                NewRecord::new(json!({"reps": 10})),
            )
            .unwrap();
        assert_eq!(first.value.version, 1);
        assert!(first.audit_warning().is_none());

        vault
            .save_record(
                "u1",
                "t1",
                Collection::ExerciseLogs,
                "l1",
                NewRecord::new(json!({"reps": 12})),
            )
            .unwrap();

        let entries = vault.audit().query("t1", &AuditFilter::new()).unwrap();
        let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Update, AuditAction::Create]);
        assert!(entries.iter().all(|e| e.data_hash.is_some()));
    }

    #[test]
    fn test_sensitive_round_trip() {
        let vault = vault();
        let saved = vault
            .save_sensitive(
                "dr-lima",
                "t1",
                Collection::Patients,
                "p1",
                json!({"initials": "AS"}),
                b"history: ACL reconstruction 2021",
                KEY,
            )
            .unwrap();
        assert!(saved.value.encrypted_payload.is_some());

        let fetched = vault
            .get_record("dr-lima", "t1", Collection::Patients, "p1")
            .unwrap();
        let record = fetched.value.unwrap();
        assert_eq!(
            vault.open_payload(&record, KEY).unwrap(),
            b"history: ACL reconstruction 2021"
        );

        let views = vault
            .audit()
            .query("t1", &AuditFilter::new().action(AuditAction::View))
            .unwrap();
        assert_eq!(views.len(), 1);
        assert!(views[0].compliance_flag);
    }

    #[test]
    fn test_sensitive_save_into_light_collection_rejected() {
        let vault = vault();
        let result = vault.save_sensitive(
            "u1",
            "t1",
            Collection::ExerciseLogs,
            "l1",
            json!({}),
            b"x",
            KEY,
        );
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_missing_record_not_audited() {
        let vault = vault();
        let fetched = vault
            .get_record("u1", "t1", Collection::Patients, "nope")
            .unwrap();
        assert!(fetched.value.is_none());
        assert!(fetched.audit.is_none());

        let deleted = vault
            .delete_record("u1", "t1", Collection::Patients, "nope")
            .unwrap();
        assert!(!deleted.value);
        assert!(deleted.audit.is_none());
    }

    #[test]
    fn test_purge_keeps_audit_trail() {
        let vault = vault();
        vault
            .save_record(
                "u1",
                "t1",
                Collection::ExerciseLogs,
                "l1",
                NewRecord::new(json!({})),
            )
            .unwrap();
        let purged = vault.purge_tenant("u1", "t1").unwrap();
        assert_eq!(purged.value, 1);

        let entries = vault.audit().query("t1", &AuditFilter::new()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entity_type, TENANT_ENTITY);
    }

    #[tokio::test]
    async fn test_backup_operations_are_audited() {
        let vault = vault();
        let full = vault
            .create_full_backup("u1", "t1", KEY, None)
            .await
            .unwrap();
        let unchanged = vault
            .create_incremental_backup("u1", "t1", KEY, &full.value)
            .await
            .unwrap();
        assert_eq!(unchanged.value, full.value);
        assert!(unchanged.audit.is_none());

        vault
            .restore_from_backup("u1", &full.value, "t1", KEY, RestoreOptions::new())
            .await
            .unwrap();

        let entries = vault
            .audit()
            .query("t1", &AuditFilter::new().entity_type(BACKUP_ENTITY))
            .unwrap();
        let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Update, AuditAction::Create]);
    }
}
