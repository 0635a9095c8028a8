//! Tenant backups: full, incremental and differential snapshots, restore
//! chains, retention and scheduling.
//!
//! ## Chains
//!
//! A full backup is self-contained. An incremental backup depends on the
//! backup it was taken against; a differential one on the latest full backup.
//! Restoring a layered backup resolves its chain down to the full base and
//! applies each layer on top, replacing whole collections. Layers also record
//! the ids deleted since the state below them, so deletions survive a restore.
//!
//! ## Concurrency
//!
//! Runs are serialized per tenant on a FIFO lane (see [`LaneState`]).

mod compression;
mod engine;
mod lanes;
mod scheduler;
mod snapshot;
mod types;

pub use engine::BackupEngine;
pub use scheduler::{BackupScheduler, ScheduledRun};
pub use snapshot::{collection_checksum, BackupSnapshot, SnapshotBody, SnapshotData, FORMAT_VERSION};
pub use types::{
    BackupConfig, BackupFrequency, BackupKind, BackupMetadata, BackupStatistics, CleanupReport,
    LaneState, RestoreOptions, RestorePoint, RestoreReport, DEFAULT_COMPRESSION_LEVEL,
    DEFAULT_MAX_BACKUP_SIZE_BYTES, DEFAULT_RETENTION_DAYS, MAX_RETENTION_DAYS,
};
