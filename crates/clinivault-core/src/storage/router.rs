//! Tenant-aware CRUD over the classified tiers.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::ephemeral::EphemeralTier;
use super::sqlite::{SqliteDatabase, SqliteTier};
use super::traits::TierBackend;
use super::types::{
    Collection, NewRecord, SaveOutcome, StorageInfo, TenantScopedRecord, Tier,
};
use crate::error::{Result, VaultError};

/// Single tenant-aware entry point to every collection.
///
/// Each collection is routed to its tier by [`Collection::tier`]. The router
/// never encrypts anything itself: sensitive payloads arrive already sealed
/// and are stored as opaque bundles.
pub struct StorageRouter {
    db: Arc<SqliteDatabase>,
    sensitive: SqliteTier,
    light: SqliteTier,
    ephemeral: EphemeralTier,
}

impl StorageRouter {
    /// Route over an existing database.
    pub fn new(db: SqliteDatabase) -> Result<Self> {
        let db = Arc::new(db);
        Ok(Self {
            sensitive: SqliteTier::new(Arc::clone(&db), Tier::DurableSensitive)?,
            light: SqliteTier::new(Arc::clone(&db), Tier::DurableLight)?,
            ephemeral: EphemeralTier::new(),
            db,
        })
    }

    /// Router over an unsaved in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::new(SqliteDatabase::open_in_memory()?)
    }

    /// Router over the sealed store at `path`.
    pub fn open(path: &Path, passphrase: &str) -> Result<Self> {
        Self::new(SqliteDatabase::open(path, passphrase)?)
    }

    /// Seal the durable tiers back to the file they were opened from.
    pub fn persist(&self, passphrase: &str) -> Result<()> {
        self.ensure_available()?;
        self.db.persist(passphrase)
    }

    /// Make the router unavailable until [`StorageRouter::reinitialize`].
    pub fn close(&self) {
        self.db.close();
        info!("storage router closed");
    }

    /// Swap in a freshly opened database after a failure or close.
    pub fn reinitialize(&self, db: SqliteDatabase) -> Result<()> {
        self.db.reinitialize(db)?;
        info!("storage router reinitialized");
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.db.is_available()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.db.is_available() {
            Ok(())
        } else {
            Err(VaultError::StorageUnavailable(
                "Durable store is not initialized".to_string(),
            ))
        }
    }

    fn tier_backend(&self, tier: Tier) -> &dyn TierBackend {
        match tier {
            Tier::DurableSensitive => &self.sensitive,
            Tier::DurableLight => &self.light,
            Tier::Ephemeral => &self.ephemeral,
        }
    }

    fn backend(&self, collection: Collection) -> &dyn TierBackend {
        self.tier_backend(collection.tier())
    }

    fn validate_scope(key: &str, tenant_id: &str) -> Result<()> {
        if tenant_id.trim().is_empty() {
            return Err(VaultError::InvalidInput(
                "Tenant id cannot be empty".to_string(),
            ));
        }
        if key.trim().is_empty() {
            return Err(VaultError::InvalidInput(
                "Record key cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert or replace a record.
    ///
    /// `tenant_id` and the modification time are always assigned here. When
    /// `encrypted` is set the record must carry a payload produced by
    /// [`crate::cipher::Cipher`]; payloads are only accepted for sensitive
    /// collections.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Validation` if the encryption flag and payload
    /// disagree, a payload targets a non-sensitive collection, or an existing
    /// append-only record would be overwritten.
    pub fn save(
        &self,
        collection: Collection,
        key: &str,
        record: &NewRecord,
        tenant_id: &str,
        encrypted: bool,
    ) -> Result<SaveOutcome> {
        self.ensure_available()?;
        Self::validate_scope(key, tenant_id)?;

        if encrypted != record.is_encrypted() {
            return Err(VaultError::Validation(if encrypted {
                "Encrypted save requires a pre-encrypted payload".to_string()
            } else {
                "Payload supplied but save is not marked encrypted".to_string()
            }));
        }
        if encrypted && !collection.is_sensitive() {
            return Err(VaultError::Validation(format!(
                "Collection {} does not accept encrypted payloads",
                collection
            )));
        }

        let backend = self.backend(collection);
        if collection.is_append_only() && backend.fetch(collection, tenant_id, key)?.is_some() {
            return Err(VaultError::Validation(format!(
                "Collection {} is append-only",
                collection
            )));
        }

        let outcome = backend.upsert(collection, tenant_id, key, record, Utc::now())?;
        debug!(
            collection = %collection,
            tier = %backend.tier(),
            tenant = tenant_id,
            version = outcome.record.version,
            "saved record"
        );
        Ok(outcome)
    }

    /// Get one record of the tenant.
    ///
    /// Returns `None` both when the key does not exist and when it exists for
    /// another tenant; the two cases are indistinguishable to the caller.
    pub fn get(
        &self,
        collection: Collection,
        key: &str,
        tenant_id: &str,
    ) -> Result<Option<TenantScopedRecord>> {
        self.ensure_available()?;
        let record = self.backend(collection).fetch(collection, tenant_id, key)?;
        Ok(record.filter(|r| r.tenant_id == tenant_id))
    }

    /// All of the tenant's records in a collection, ordered by id.
    pub fn get_all(
        &self,
        collection: Collection,
        tenant_id: &str,
    ) -> Result<Vec<TenantScopedRecord>> {
        self.ensure_available()?;
        let mut records = self.backend(collection).fetch_all(collection, tenant_id)?;
        records.retain(|r| r.tenant_id == tenant_id);
        Ok(records)
    }

    /// Delete one record of the tenant.
    ///
    /// Deleting a key that is missing or owned by another tenant is a no-op
    /// and returns `false`.
    pub fn delete(&self, collection: Collection, key: &str, tenant_id: &str) -> Result<bool> {
        self.ensure_available()?;
        if collection.is_append_only() {
            return Err(VaultError::Validation(format!(
                "Collection {} is append-only",
                collection
            )));
        }
        let removed = self.backend(collection).remove(collection, tenant_id, key)?;
        if removed {
            debug!(collection = %collection, tenant = tenant_id, "deleted record");
        }
        Ok(removed)
    }

    /// Delete every record of the tenant across all collections except the
    /// append-only audit trail.
    ///
    /// # Returns
    ///
    /// Returns the number of removed records.
    pub fn clear_tenant_data(&self, tenant_id: &str) -> Result<usize> {
        self.ensure_available()?;
        if tenant_id.trim().is_empty() {
            return Err(VaultError::InvalidInput(
                "Tenant id cannot be empty".to_string(),
            ));
        }

        let mut removed = 0;
        for tier in Tier::ALL {
            let collections: Vec<Collection> = Collection::ALL
                .iter()
                .copied()
                .filter(|c| c.tier() == tier && !c.is_append_only())
                .collect();
            removed += self
                .tier_backend(tier)
                .remove_tenant(&collections, tenant_id)?;
        }
        info!(tenant = tenant_id, removed, "cleared tenant data");
        Ok(removed)
    }

    /// Byte usage per tier across all tenants.
    pub fn get_storage_info(&self) -> Result<StorageInfo> {
        self.ensure_available()?;
        Ok(StorageInfo {
            durable_sensitive: self.tier_backend(Tier::DurableSensitive).usage()?,
            durable_light: self.tier_backend(Tier::DurableLight).usage()?,
            ephemeral: self.tier_backend(Tier::Ephemeral).usage()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::{Cipher, KdfParams};
    use serde_json::json;

    fn router() -> StorageRouter {
        StorageRouter::in_memory().unwrap()
    }

    fn patient(name: &str) -> NewRecord {
        NewRecord::new(json!({ "name": name }))
    }

    #[test]
    fn test_save_sets_tenant_and_version() {
        let router = router();
        let outcome = router
            .save(Collection::Patients, "p1", &patient("Ana"), "t1", false)
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.record.tenant_id, "t1");
        assert_eq!(outcome.record.version, 1);

        let again = router
            .save(Collection::Patients, "p1", &patient("Ana B."), "t1", false)
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.record.version, 2);
        assert!(again.record.last_modified >= outcome.record.last_modified);
    }

    #[test]
    fn test_get_other_tenant_returns_none() {
        let router = router();
        router
            .save(Collection::Patients, "p1", &patient("Ana"), "t1", false)
            .unwrap();

        assert!(router.get(Collection::Patients, "p1", "t2").unwrap().is_none());
        assert!(router.get(Collection::Patients, "p1", "t1").unwrap().is_some());
        assert!(router.get_all(Collection::Patients, "t2").unwrap().is_empty());
    }

    #[test]
    fn test_delete_other_tenant_is_noop() {
        let router = router();
        router
            .save(Collection::ExerciseLogs, "l1", &patient("x"), "t1", false)
            .unwrap();

        assert!(!router.delete(Collection::ExerciseLogs, "l1", "t2").unwrap());
        assert!(router.get(Collection::ExerciseLogs, "l1", "t1").unwrap().is_some());
        assert!(router.delete(Collection::ExerciseLogs, "l1", "t1").unwrap());
        assert!(router.get(Collection::ExerciseLogs, "l1", "t1").unwrap().is_none());
    }

    #[test]
    fn test_encrypted_payload_stored_opaquely() {
        let router = router();
        let cipher = Cipher::new(KdfParams::insecure_fast());
        let bundle = cipher.seal(b"diagnosis", "clinic-master-key").unwrap();
        let record = patient("Ana").with_encrypted_payload(bundle.clone());

        router
            .save(Collection::Assessments, "a1", &record, "t1", true)
            .unwrap();
        let stored = router
            .get(Collection::Assessments, "a1", "t1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.encrypted_payload, Some(bundle));
    }

    #[test]
    fn test_encryption_flag_must_match_payload() {
        let router = router();
        let result = router.save(Collection::Patients, "p1", &patient("Ana"), "t1", true);
        assert!(matches!(result, Err(VaultError::Validation(_))));

        let cipher = Cipher::new(KdfParams::insecure_fast());
        let bundle = cipher.seal(b"x", "clinic-master-key").unwrap();
        let record = patient("Ana").with_encrypted_payload(bundle);
        let result = router.save(Collection::Patients, "p1", &record, "t1", false);
        assert!(matches!(result, Err(VaultError::Validation(_))));

        let result = router.save(Collection::ExerciseLogs, "l1", &record, "t1", true);
        assert!(matches!(result, Err(VaultError::Validation(_))));
    }

    #[test]
    fn test_audit_collection_append_only() {
        let router = router();
        router
            .save(Collection::AuditLogs, "e1", &patient("x"), "t1", false)
            .unwrap();
        assert!(router
            .save(Collection::AuditLogs, "e1", &patient("y"), "t1", false)
            .is_err());
        assert!(router.delete(Collection::AuditLogs, "e1", "t1").is_err());
    }

    #[test]
    fn test_clear_tenant_data_keeps_other_tenants_and_audit() {
        let router = router();
        router
            .save(Collection::Patients, "p1", &patient("Ana"), "t1", false)
            .unwrap();
        router
            .save(Collection::ExerciseLogs, "l1", &patient("x"), "t1", false)
            .unwrap();
        router
            .save(Collection::Drafts, "d1", &patient("x"), "t1", false)
            .unwrap();
        router
            .save(Collection::AuditLogs, "e1", &patient("x"), "t1", false)
            .unwrap();
        router
            .save(Collection::Patients, "p1", &patient("Bia"), "t2", false)
            .unwrap();

        assert_eq!(router.clear_tenant_data("t1").unwrap(), 3);
        for collection in [Collection::Patients, Collection::ExerciseLogs, Collection::Drafts] {
            assert!(router.get_all(collection, "t1").unwrap().is_empty());
        }
        assert_eq!(router.get_all(Collection::AuditLogs, "t1").unwrap().len(), 1);
        assert_eq!(router.get_all(Collection::Patients, "t2").unwrap().len(), 1);
    }

    #[test]
    fn test_storage_info_per_tier() {
        let router = router();
        router
            .save(Collection::Patients, "p1", &patient("Ana"), "t1", false)
            .unwrap();
        router
            .save(Collection::Drafts, "d1", &patient("Ana"), "t1", false)
            .unwrap();

        let info = router.get_storage_info().unwrap();
        assert_eq!(info.durable_sensitive.records, 1);
        assert_eq!(info.durable_light.records, 0);
        assert_eq!(info.ephemeral.records, 1);
        assert!(info.total_bytes() > 0);
    }

    #[test]
    fn test_closed_router_rejects_all_calls() {
        let router = router();
        router.close();

        assert!(matches!(
            router.get(Collection::Drafts, "d1", "t1"),
            Err(VaultError::StorageUnavailable(_))
        ));
        assert!(matches!(
            router.save(Collection::Drafts, "d1", &patient("x"), "t1", false),
            Err(VaultError::StorageUnavailable(_))
        ));

        router
            .reinitialize(SqliteDatabase::open_in_memory().unwrap())
            .unwrap();
        assert!(router.get_all(Collection::Patients, "t1").unwrap().is_empty());
    }

    #[test]
    fn test_empty_tenant_rejected() {
        let router = router();
        assert!(matches!(
            router.save(Collection::Patients, "p1", &patient("x"), " ", false),
            Err(VaultError::InvalidInput(_))
        ));
    }
}
