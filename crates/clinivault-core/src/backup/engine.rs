//! Backup creation, verification, restore and retention.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::lanes::TenantLanes;
use super::snapshot::{self, collection_checksum, BackupSnapshot, SnapshotBody, FORMAT_VERSION};
use super::types::{
    BackupConfig, BackupKind, BackupMetadata, BackupStatistics, CleanupReport, LaneState,
    RestoreOptions, RestorePoint, RestoreReport,
};
use crate::cipher::{validate_master_key, Cipher};
use crate::error::{Result, VaultError};
use crate::storage::{Collection, NewRecord, StorageRouter, TenantScopedRecord};

/// Creates and restores tenant backups through the storage router.
///
/// Backups are stored as records of the `backups` collection. Runs of one
/// tenant (backup, restore, cleanup, delete) are serialized on that tenant's
/// lane in arrival order; tenants never wait on each other. Scheduled and
/// interactive runs share the same lane.
pub struct BackupEngine {
    storage: Arc<StorageRouter>,
    cipher: Arc<Cipher>,
    configs: RwLock<HashMap<String, BackupConfig>>,
    lanes: TenantLanes,
}

type Records = BTreeMap<Collection, Vec<TenantScopedRecord>>;

impl BackupEngine {
    pub fn new(storage: Arc<StorageRouter>, cipher: Arc<Cipher>) -> Self {
        Self {
            storage,
            cipher,
            configs: RwLock::new(HashMap::new()),
            lanes: TenantLanes::new(),
        }
    }

    pub fn storage(&self) -> &Arc<StorageRouter> {
        &self.storage
    }

    /// Set a tenant's backup policy, replacing any previous one.
    pub fn configure_backup(&self, mut config: BackupConfig) -> Result<()> {
        config.validate()?;
        info!(
            tenant = %config.tenant_id,
            frequency = %config.frequency,
            retention_days = config.retention_days,
            "configured backups"
        );
        self.configs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(config.tenant_id.clone(), config);
        Ok(())
    }

    /// The tenant's policy, or the default policy if it was never configured.
    pub fn backup_config(&self, tenant_id: &str) -> BackupConfig {
        self.configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tenant_id)
            .cloned()
            .unwrap_or_else(|| BackupConfig::for_tenant(tenant_id))
    }

    pub fn configured_tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self
            .configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        tenants.sort();
        tenants
    }

    pub fn lane_state(&self, tenant_id: &str) -> LaneState {
        self.lanes.state(tenant_id)
    }

    /// Snapshot every configured collection of the tenant.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::SizeLimitExceeded` if the stored payload would be
    /// larger than the tenant's `max_backup_size_bytes`.
    pub async fn create_full_backup(
        &self,
        tenant_id: &str,
        master_key: &str,
        description: Option<&str>,
    ) -> Result<String> {
        let _lane = self.lanes.acquire(tenant_id).await;
        self.full_backup(tenant_id, master_key, description)
    }

    /// Snapshot the collections that changed since `last_backup_id`.
    ///
    /// Returns `last_backup_id` itself, creating nothing, when no configured
    /// collection changed.
    pub async fn create_incremental_backup(
        &self,
        tenant_id: &str,
        master_key: &str,
        last_backup_id: &str,
    ) -> Result<String> {
        let _lane = self.lanes.acquire(tenant_id).await;
        self.layered_backup(tenant_id, master_key, last_backup_id, BackupKind::Incremental)
    }

    /// Snapshot the collections that changed since the tenant's latest full
    /// backup. Returns that full backup's id when nothing changed.
    pub async fn create_differential_backup(
        &self,
        tenant_id: &str,
        master_key: &str,
    ) -> Result<String> {
        let _lane = self.lanes.acquire(tenant_id).await;
        let base_id = self
            .load_all(tenant_id)?
            .into_iter()
            .filter(|s| s.metadata.kind == BackupKind::Full && s.verify(&self.cipher))
            .max_by_key(|s| s.metadata.timestamp)
            .map(|s| s.metadata.id)
            .ok_or_else(|| {
                VaultError::BackupNotFound(format!("No full backup for tenant {}", tenant_id))
            })?;
        self.layered_backup(tenant_id, master_key, &base_id, BackupKind::Differential)
    }

    /// All of the tenant's backups, newest first.
    pub fn list_backups(&self, tenant_id: &str) -> Result<Vec<BackupSnapshot>> {
        let mut backups = self.load_all(tenant_id)?;
        backups.sort_by(|a, b| b.metadata.timestamp.cmp(&a.metadata.timestamp));
        Ok(backups)
    }

    pub fn get_backup(&self, tenant_id: &str, backup_id: &str) -> Result<BackupSnapshot> {
        let record = self
            .storage
            .get(Collection::Backups, backup_id, tenant_id)?
            .ok_or_else(|| VaultError::BackupNotFound(backup_id.to_string()))?;
        serde_json::from_value(record.public_data).map_err(|e| {
            VaultError::IntegrityFailure(format!("Backup {} is unreadable: {}", backup_id, e))
        })
    }

    /// Restore points of the tenant, newest first.
    ///
    /// A point can be restored when it and every backup it depends on pass
    /// the integrity check.
    pub fn get_restore_points(&self, tenant_id: &str) -> Result<Vec<RestorePoint>> {
        let all = self.index(tenant_id)?;
        let mut points: Vec<RestorePoint> = all
            .values()
            .map(|snapshot| RestorePoint {
                backup_id: snapshot.metadata.id.clone(),
                timestamp: snapshot.metadata.timestamp,
                description: snapshot.description.clone(),
                kind: snapshot.metadata.kind,
                size_bytes: snapshot.metadata.size_bytes,
                can_restore: self.chain_of(&all, &snapshot.metadata.id).is_ok(),
                required_backups: snapshot.metadata.dependencies.clone(),
            })
            .collect();
        points.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(points)
    }

    /// Restore the tenant's collections from a backup and its dependency chain.
    ///
    /// Nothing is written unless the whole chain verifies and decodes.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::BackupNotFound` for an unknown id,
    /// `VaultError::IntegrityFailure` if any backup in the chain fails
    /// verification or is missing, `VaultError::DecryptionFailure` for a wrong
    /// master key, and `VaultError::InvalidInput` if a requested collection is
    /// not covered by the backup.
    pub async fn restore_from_backup(
        &self,
        backup_id: &str,
        tenant_id: &str,
        master_key: &str,
        options: RestoreOptions,
    ) -> Result<RestoreReport> {
        let _lane = self.lanes.acquire(tenant_id).await;
        self.restore(backup_id, tenant_id, master_key, options)
    }

    /// Keyless integrity check of one snapshot.
    pub fn verify_backup_integrity(&self, snapshot: &BackupSnapshot) -> bool {
        snapshot.verify(&self.cipher)
    }

    /// Verify a stored backup. With `master_key`, sealed contents are also
    /// decrypted and checked collection by collection.
    pub fn verify_backup(
        &self,
        tenant_id: &str,
        backup_id: &str,
        master_key: Option<&str>,
    ) -> Result<bool> {
        let snapshot = self.get_backup(tenant_id, backup_id)?;
        if !snapshot.verify(&self.cipher) {
            return Ok(false);
        }
        if let Some(master_key) = master_key {
            match snapshot.decode(&self.cipher, Some(master_key)) {
                Ok(_) => {}
                Err(VaultError::IntegrityFailure(_)) => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        Ok(true)
    }

    /// Apply the tenant's retention policy now.
    pub async fn cleanup_old_backups(&self, tenant_id: &str) -> Result<CleanupReport> {
        self.cleanup_old_backups_as_of(tenant_id, Utc::now()).await
    }

    /// Apply the tenant's retention policy as if the current time were `now`.
    ///
    /// Backups older than the retention window are deleted unless a retained
    /// backup depends on them, directly or transitively. Does nothing when
    /// auto-cleanup is off.
    pub async fn cleanup_old_backups_as_of(
        &self,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport> {
        let _lane = self.lanes.acquire(tenant_id).await;

        let config = self.backup_config(tenant_id);
        if !config.auto_cleanup {
            debug!(tenant = tenant_id, "auto-cleanup disabled");
            return Ok(CleanupReport::default());
        }

        // A window reaching past the earliest representable time expires nothing.
        let Some(cutoff) = now.checked_sub_signed(config.retention()) else {
            debug!(tenant = tenant_id, "retention window exceeds time range");
            return Ok(CleanupReport::default());
        };
        let all = self.load_all(tenant_id)?;
        let by_id: HashMap<&str, &BackupSnapshot> =
            all.iter().map(|s| (s.metadata.id.as_str(), s)).collect();

        let mut protected: HashSet<&str> = HashSet::new();
        let mut pending: Vec<&str> = all
            .iter()
            .filter(|s| s.metadata.timestamp >= cutoff)
            .flat_map(|s| s.metadata.dependencies.iter().map(String::as_str))
            .collect();
        while let Some(id) = pending.pop() {
            if protected.insert(id) {
                if let Some(snapshot) = by_id.get(id) {
                    pending.extend(snapshot.metadata.dependencies.iter().map(String::as_str));
                }
            }
        }

        let mut report = CleanupReport::default();
        for snapshot in all.iter().filter(|s| s.metadata.timestamp < cutoff) {
            let id = snapshot.metadata.id.as_str();
            if protected.contains(id) {
                warn!(
                    tenant = tenant_id,
                    backup = id,
                    "keeping expired backup required by a retained backup"
                );
                report.retained_for_dependencies.push(id.to_string());
            } else {
                self.storage.delete(Collection::Backups, id, tenant_id)?;
                report.deleted.push(id.to_string());
            }
        }

        info!(
            tenant = tenant_id,
            deleted = report.deleted.len(),
            kept = report.retained_for_dependencies.len(),
            "backup cleanup finished"
        );
        Ok(report)
    }

    /// Delete one backup.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::BackupNotFound` for an unknown id and
    /// `VaultError::Validation` if another backup depends on it.
    pub async fn delete_backup(&self, tenant_id: &str, backup_id: &str) -> Result<()> {
        let _lane = self.lanes.acquire(tenant_id).await;

        let all = self.load_all(tenant_id)?;
        if !all.iter().any(|s| s.metadata.id == backup_id) {
            return Err(VaultError::BackupNotFound(backup_id.to_string()));
        }
        if let Some(dependent) = all
            .iter()
            .find(|s| s.metadata.dependencies.iter().any(|d| d == backup_id))
        {
            return Err(VaultError::Validation(format!(
                "Backup {} is required by backup {}",
                backup_id, dependent.metadata.id
            )));
        }

        self.storage
            .delete(Collection::Backups, backup_id, tenant_id)?;
        info!(tenant = tenant_id, backup = backup_id, "deleted backup");
        Ok(())
    }

    pub fn get_backup_statistics(&self, tenant_id: &str) -> Result<BackupStatistics> {
        let all = self.load_all(tenant_id)?;
        let count = |kind: BackupKind| all.iter().filter(|s| s.metadata.kind == kind).count();
        let total_size_bytes: u64 = all.iter().map(|s| s.metadata.size_bytes).sum();

        Ok(BackupStatistics {
            tenant_id: tenant_id.to_string(),
            total_backups: all.len(),
            full_backups: count(BackupKind::Full),
            incremental_backups: count(BackupKind::Incremental),
            differential_backups: count(BackupKind::Differential),
            total_size_bytes,
            average_size_bytes: if all.is_empty() {
                0
            } else {
                total_size_bytes / all.len() as u64
            },
            oldest_backup: all.iter().map(|s| s.metadata.timestamp).min(),
            newest_backup: all.iter().map(|s| s.metadata.timestamp).max(),
            last_full_backup_id: all
                .iter()
                .filter(|s| s.metadata.kind == BackupKind::Full)
                .max_by_key(|s| s.metadata.timestamp)
                .map(|s| s.metadata.id.clone()),
            lane: self.lanes.state(tenant_id),
        })
    }

    // Lane-free implementations; callers must hold the tenant's lane.

    pub(crate) fn full_backup(
        &self,
        tenant_id: &str,
        master_key: &str,
        description: Option<&str>,
    ) -> Result<String> {
        let config = self.backup_config(tenant_id);
        let (collections, checksums) = self.read_collections(tenant_id, &config.data_types)?;
        let body = SnapshotBody {
            collections,
            tombstones: BTreeMap::new(),
        };

        let snapshot = self.write_snapshot(
            &config,
            master_key,
            BackupKind::Full,
            body,
            &checksums,
            Vec::new(),
            description.unwrap_or("Full backup"),
        )?;
        info!(
            tenant = tenant_id,
            backup = %snapshot.metadata.id,
            size_bytes = snapshot.metadata.size_bytes,
            "created full backup"
        );
        Ok(snapshot.metadata.id)
    }

    fn layered_backup(
        &self,
        tenant_id: &str,
        master_key: &str,
        base_id: &str,
        kind: BackupKind,
    ) -> Result<String> {
        let config = self.backup_config(tenant_id);
        let all = self.index(tenant_id)?;
        let chain = self.chain_of(&all, base_id)?;

        // Newest layer wins for each collection.
        let mut effective: BTreeMap<Collection, &str> = BTreeMap::new();
        for layer in chain.iter().rev() {
            for (collection, checksum) in &layer.metadata.checksums {
                effective.entry(*collection).or_insert(checksum.as_str());
            }
        }

        let (mut current, checksums) = self.read_collections(tenant_id, &config.data_types)?;
        let changed: BTreeSet<Collection> = checksums
            .iter()
            .filter(|(collection, checksum)| {
                effective.get(*collection).copied() != Some(checksum.as_str())
            })
            .map(|(collection, _)| *collection)
            .collect();

        if changed.is_empty() {
            debug!(tenant = tenant_id, base = base_id, "no changes since base backup");
            return Ok(base_id.to_string());
        }

        let previous = self.resolve(&chain, master_key)?;
        current.retain(|collection, _| changed.contains(collection));

        let mut tombstones: BTreeMap<Collection, BTreeSet<String>> = BTreeMap::new();
        for (collection, records) in &current {
            let Some(before) = previous.collections.get(collection) else {
                continue;
            };
            let now: HashSet<&str> = records.iter().map(|r| r.id.as_str()).collect();
            let deleted: BTreeSet<String> = before
                .iter()
                .filter(|r| !now.contains(r.id.as_str()))
                .map(|r| r.id.clone())
                .collect();
            if !deleted.is_empty() {
                tombstones.insert(*collection, deleted);
            }
        }

        let body = SnapshotBody {
            collections: current,
            tombstones,
        };
        let description = format!("{} backup on top of {}", capitalize(kind.as_str()), base_id);
        let snapshot = self.write_snapshot(
            &config,
            master_key,
            kind,
            body,
            &checksums,
            vec![base_id.to_string()],
            &description,
        )?;
        info!(
            tenant = tenant_id,
            backup = %snapshot.metadata.id,
            kind = %kind,
            base = base_id,
            changed = changed.len(),
            "created layered backup"
        );
        Ok(snapshot.metadata.id)
    }

    fn restore(
        &self,
        backup_id: &str,
        tenant_id: &str,
        master_key: &str,
        options: RestoreOptions,
    ) -> Result<RestoreReport> {
        let all = self.index(tenant_id)?;
        let chain = self.chain_of(&all, backup_id)?;
        let resolved = self.resolve(&chain, master_key)?;
        let chain_ids: Vec<String> = chain.iter().map(|s| s.metadata.id.clone()).collect();

        let data_types: Vec<Collection> = match options.data_types {
            Some(requested) => {
                let requested: BTreeSet<Collection> = requested.into_iter().collect();
                if let Some(missing) = requested
                    .iter()
                    .find(|c| !resolved.collections.contains_key(*c))
                {
                    return Err(VaultError::InvalidInput(format!(
                        "Backup {} does not cover collection {}",
                        backup_id, missing
                    )));
                }
                requested.into_iter().collect()
            }
            None => resolved.collections.keys().copied().collect(),
        };

        let safety_backup_id = if options.create_backup_first {
            let description = format!("Safety backup before restoring {}", backup_id);
            Some(self.full_backup(tenant_id, master_key, Some(&description))?)
        } else {
            None
        };

        let mut restored = BTreeMap::new();
        let mut removed = 0;
        for collection in data_types {
            let records = resolved
                .collections
                .get(&collection)
                .map(Vec::as_slice)
                .unwrap_or_default();

            if options.overwrite {
                for existing in self.storage.get_all(collection, tenant_id)? {
                    if self.storage.delete(collection, &existing.id, tenant_id)? {
                        removed += 1;
                    }
                }
            } else if let Some(deleted) = resolved.tombstones.get(&collection) {
                for id in deleted {
                    if self.storage.delete(collection, id, tenant_id)? {
                        removed += 1;
                    }
                }
            }

            for record in records {
                self.storage.save(
                    collection,
                    &record.id,
                    &NewRecord::from(record),
                    tenant_id,
                    record.encrypted_payload.is_some(),
                )?;
            }
            restored.insert(collection, records.len());
        }

        info!(
            tenant = tenant_id,
            backup = backup_id,
            layers = chain_ids.len(),
            collections = restored.len(),
            removed,
            "restored backup"
        );
        Ok(RestoreReport {
            backup_id: backup_id.to_string(),
            chain: chain_ids,
            restored,
            removed,
            safety_backup_id,
        })
    }

    fn read_collections(
        &self,
        tenant_id: &str,
        data_types: &[Collection],
    ) -> Result<(Records, BTreeMap<Collection, String>)> {
        let mut collections = BTreeMap::new();
        let mut checksums = BTreeMap::new();
        for collection in data_types {
            let records = self.storage.get_all(*collection, tenant_id)?;
            checksums.insert(*collection, collection_checksum(&self.cipher, &records)?);
            collections.insert(*collection, records);
        }
        Ok((collections, checksums))
    }

    #[allow(clippy::too_many_arguments)]
    fn write_snapshot(
        &self,
        config: &BackupConfig,
        master_key: &str,
        kind: BackupKind,
        body: SnapshotBody,
        checksums: &BTreeMap<Collection, String>,
        dependencies: Vec<String>,
        description: &str,
    ) -> Result<BackupSnapshot> {
        let tenant_id = config.tenant_id.as_str();
        let seal_key = if config.encryption_enabled {
            validate_master_key(master_key)?;
            Some(master_key)
        } else {
            None
        };

        let packed = snapshot::pack(&self.cipher, &body, config.compression_level, seal_key)?;
        if packed.size_bytes > config.max_backup_size_bytes {
            return Err(VaultError::SizeLimitExceeded {
                size: packed.size_bytes,
                limit: config.max_backup_size_bytes,
            });
        }

        let snapshot = BackupSnapshot {
            metadata: BackupMetadata {
                id: Uuid::now_v7().to_string(),
                tenant_id: tenant_id.to_string(),
                timestamp: self.next_timestamp(tenant_id)?,
                format_version: FORMAT_VERSION.to_string(),
                kind,
                data_types: body.collections.keys().copied().collect(),
                checksums: body
                    .collections
                    .keys()
                    .filter_map(|c| checksums.get(c).map(|h| (*c, h.clone())))
                    .collect(),
                size_bytes: packed.size_bytes,
                compressed: packed.compressed,
                encrypted: packed.encrypted,
                dependencies,
                payload_checksum: packed.payload_checksum,
            },
            data: packed.data,
            description: description.to_string(),
        };

        // Metadata and payload go in as one record.
        let public_data = serde_json::to_value(&snapshot)?;
        self.storage.save(
            Collection::Backups,
            &snapshot.metadata.id,
            &NewRecord::new(public_data),
            tenant_id,
            false,
        )?;
        Ok(snapshot)
    }

    /// Now, or just after the tenant's newest backup if the clock lags it.
    fn next_timestamp(&self, tenant_id: &str) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let latest = self
            .load_all(tenant_id)?
            .into_iter()
            .map(|s| s.metadata.timestamp)
            .max();
        Ok(match latest {
            Some(latest) if latest >= now => latest + chrono::Duration::milliseconds(1),
            _ => now,
        })
    }

    fn load_all(&self, tenant_id: &str) -> Result<Vec<BackupSnapshot>> {
        let mut backups = Vec::new();
        for record in self.storage.get_all(Collection::Backups, tenant_id)? {
            match serde_json::from_value::<BackupSnapshot>(record.public_data) {
                Ok(snapshot) => backups.push(snapshot),
                Err(err) => warn!(
                    tenant = tenant_id,
                    backup = %record.id,
                    error = %err,
                    "skipping unreadable backup record"
                ),
            }
        }
        Ok(backups)
    }

    fn index(&self, tenant_id: &str) -> Result<HashMap<String, BackupSnapshot>> {
        Ok(self
            .load_all(tenant_id)?
            .into_iter()
            .map(|s| (s.metadata.id.clone(), s))
            .collect())
    }

    /// The verified chain ending at `backup_id`, full base first.
    fn chain_of<'a>(
        &self,
        all: &'a HashMap<String, BackupSnapshot>,
        backup_id: &'a str,
    ) -> Result<Vec<&'a BackupSnapshot>> {
        let mut chain: Vec<&BackupSnapshot> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current = backup_id;

        loop {
            let snapshot = match all.get(current) {
                Some(snapshot) => snapshot,
                None if chain.is_empty() => {
                    return Err(VaultError::BackupNotFound(backup_id.to_string()))
                }
                None => {
                    return Err(VaultError::IntegrityFailure(format!(
                        "Backup {} depends on missing backup {}",
                        backup_id, current
                    )))
                }
            };
            if !seen.insert(current) {
                return Err(VaultError::IntegrityFailure(format!(
                    "Dependency cycle at backup {}",
                    current
                )));
            }
            if !snapshot.verify(&self.cipher) {
                return Err(VaultError::IntegrityFailure(format!(
                    "Backup {} failed verification",
                    current
                )));
            }
            chain.push(snapshot);

            if snapshot.metadata.kind == BackupKind::Full {
                break;
            }
            current = snapshot
                .metadata
                .dependencies
                .first()
                .map(String::as_str)
                .ok_or_else(|| {
                    VaultError::IntegrityFailure(format!(
                        "Backup {} has no base backup",
                        snapshot.metadata.id
                    ))
                })?;
        }

        chain.reverse();
        Ok(chain)
    }

    /// Collapse a chain into one body: each layer replaces whole collections
    /// of the layers below, and deletions accumulate.
    fn resolve(&self, chain: &[&BackupSnapshot], master_key: &str) -> Result<SnapshotBody> {
        let mut state = SnapshotBody::default();
        for layer in chain {
            let body = layer.decode(&self.cipher, Some(master_key))?;
            for (collection, ids) in body.tombstones {
                state.tombstones.entry(collection).or_default().extend(ids);
            }
            for (collection, records) in body.collections {
                state.collections.insert(collection, records);
            }
        }

        // An id present in the final state was re-created after its deletion.
        for (collection, ids) in state.tombstones.iter_mut() {
            if let Some(records) = state.collections.get(collection) {
                ids.retain(|id| !records.iter().any(|r| &r.id == id));
            }
        }
        state.tombstones.retain(|_, ids| !ids.is_empty());
        Ok(state)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
