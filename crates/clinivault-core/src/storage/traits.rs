//! Tier backend trait definition.
//!
//! The `TierBackend` trait is the seam between the router and the physical
//! stores behind each tier. The router owns tenant gating, validation and
//! classification; a backend only stores and retrieves rows keyed by
//! `(collection, tenant_id, id)`.

use chrono::{DateTime, Utc};

use super::types::{Collection, NewRecord, SaveOutcome, TenantScopedRecord, Tier, TierUsage};
use crate::error::Result;

/// Physical store behind one tier.
///
/// All implementations must ensure:
/// - Rows of different tenants never alias, even with equal ids
/// - `fetch_all` cost is proportional to the tenant's own rows
/// - `upsert` assigns `version` atomically with the write
pub trait TierBackend: Send + Sync {
    /// Tier this backend serves.
    fn tier(&self) -> Tier;

    /// Get one record.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(record))` if found, `Ok(None)` if not found.
    fn fetch(
        &self,
        collection: Collection,
        tenant_id: &str,
        id: &str,
    ) -> Result<Option<TenantScopedRecord>>;

    /// All records of one tenant in a collection, ordered by id.
    fn fetch_all(&self, collection: Collection, tenant_id: &str)
        -> Result<Vec<TenantScopedRecord>>;

    /// Insert or replace a record, bumping its version.
    fn upsert(
        &self,
        collection: Collection,
        tenant_id: &str,
        id: &str,
        record: &NewRecord,
        at: DateTime<Utc>,
    ) -> Result<SaveOutcome>;

    /// Remove one record. Returns whether a row was removed.
    fn remove(&self, collection: Collection, tenant_id: &str, id: &str) -> Result<bool>;

    /// Remove every record of a tenant in the given collections.
    ///
    /// # Returns
    ///
    /// Returns the number of removed records.
    fn remove_tenant(&self, collections: &[Collection], tenant_id: &str) -> Result<usize>;

    /// Bytes and records currently held.
    fn usage(&self) -> Result<TierUsage>;
}
