//! In-process ephemeral tier. Nothing here survives a restart.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::{Result, VaultError};
use crate::storage::traits::TierBackend;
use crate::storage::types::{
    Collection, NewRecord, SaveOutcome, TenantScopedRecord, Tier, TierUsage,
};

type RecordKey = (Collection, String, String);

#[derive(Default)]
pub struct EphemeralTier {
    records: Mutex<BTreeMap<RecordKey, TenantScopedRecord>>,
}

impl EphemeralTier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<RecordKey, TenantScopedRecord>>> {
        self.records
            .lock()
            .map_err(|_| VaultError::StorageUnavailable("Ephemeral tier poisoned".to_string()))
    }

    fn key(collection: Collection, tenant_id: &str, id: &str) -> RecordKey {
        (collection, tenant_id.to_string(), id.to_string())
    }

    fn record_bytes(record: &TenantScopedRecord) -> u64 {
        let public = serde_json::to_vec(&record.public_data).map_or(0, |b| b.len());
        let payload = record
            .encrypted_payload
            .as_ref()
            .and_then(|p| serde_json::to_vec(p).ok())
            .map_or(0, |b| b.len());
        (public + payload) as u64
    }
}

impl TierBackend for EphemeralTier {
    fn tier(&self) -> Tier {
        Tier::Ephemeral
    }

    fn fetch(
        &self,
        collection: Collection,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<TenantScopedRecord>> {
        let records = self.lock()?;
        Ok(records.get(&Self::key(collection, tenant_id, id)).cloned())
    }

    fn fetch_all(
        &self,
        collection: Collection,
        tenant_id: &str,
    ) -> Result<Vec<TenantScopedRecord>> {
        let records = self.lock()?;
        let start = Self::key(collection, tenant_id, "");
        Ok(records
            .range(start..)
            .take_while(|((c, t, _), _)| *c == collection && t == tenant_id)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn upsert(
        &self,
        collection: Collection,
        tenant_id: &str,
        id: &str,
        record: &NewRecord,
        at: DateTime<Utc>,
    ) -> Result<SaveOutcome> {
        let mut records = self.lock()?;
        let key = Self::key(collection, tenant_id, id);
        let previous = records.get(&key).map(|r| r.version);
        let stored = TenantScopedRecord {
            id: id.to_string(),
            tenant_id: tenant_id.to_string(),
            public_data: record.public_data.clone(),
            encrypted_payload: record.encrypted_payload.clone(),
            last_modified: at,
            version: previous.map_or(1, |v| v + 1),
        };
        records.insert(key, stored.clone());
        Ok(SaveOutcome {
            record: stored,
            created: previous.is_none(),
        })
    }

    fn remove(&self, collection: Collection, tenant_id: &str, id: &str) -> Result<bool> {
        let mut records = self.lock()?;
        Ok(records.remove(&Self::key(collection, tenant_id, id)).is_some())
    }

    fn remove_tenant(&self, collections: &[Collection], tenant_id: &str) -> Result<usize> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|(c, t, _), _| !(t == tenant_id && collections.contains(c)));
        Ok(before - records.len())
    }

    fn usage(&self) -> Result<TierUsage> {
        let records = self.lock()?;
        Ok(TierUsage {
            bytes: records.values().map(Self::record_bytes).sum(),
            records: records.len() as u64,
        })
    }
}
