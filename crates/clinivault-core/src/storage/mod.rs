//! Tenant-scoped storage for Clinivault.
//!
//! This module defines the `StorageRouter`, the tier backends behind it and
//! the record types it stores.
//!
//! ## Architecture
//!
//! Every collection is statically classified into one of three tiers:
//! - **Durable-sensitive**: clinical records carrying encrypted payloads
//! - **Durable-light**: public-only records (exercise logs, backups, audit)
//! - **Ephemeral**: in-process scratch data (drafts)
//!
//! Both durable tiers live in one in-memory SQLite database that is sealed
//! with Age and written atomically to disk on `persist`. The ephemeral tier
//! is an in-process map.
//!
//! ## Tenant isolation
//!
//! The physical store is shared. Every row is keyed by
//! `(collection, tenant_id, id)` and every read is filtered by tenant; a
//! record is never returned to a caller asking under a different tenant.

pub mod encryption;
pub mod ephemeral;
pub mod router;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export public types
pub use router::StorageRouter;
pub use sqlite::SqliteDatabase;
pub use traits::TierBackend;
pub use types::{
    Collection, NewRecord, SaveOutcome, StorageInfo, TenantScopedRecord, Tier, TierUsage,
};
