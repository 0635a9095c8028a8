//! Backup configuration, metadata and reporting types.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};
use crate::storage::Collection;

/// Default retention window.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Longest accepted retention window (1000 years).
pub const MAX_RETENTION_DAYS: u32 = 365_000;

/// Default gzip level; 0 disables compression.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Default size ceiling of one stored backup payload (100 MiB).
pub const DEFAULT_MAX_BACKUP_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// How often the scheduler fires for a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFrequency {
    Realtime,
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl BackupFrequency {
    /// Interval between two scheduled runs.
    pub fn period(&self) -> Duration {
        match self {
            BackupFrequency::Realtime => Duration::from_secs(15 * 60),
            BackupFrequency::Hourly => Duration::from_secs(60 * 60),
            BackupFrequency::Daily => Duration::from_secs(24 * 60 * 60),
            BackupFrequency::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupFrequency::Realtime => "realtime",
            BackupFrequency::Hourly => "hourly",
            BackupFrequency::Daily => "daily",
            BackupFrequency::Weekly => "weekly",
        }
    }
}

impl fmt::Display for BackupFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupFrequency {
    type Err = VaultError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "realtime" => Ok(BackupFrequency::Realtime),
            "hourly" => Ok(BackupFrequency::Hourly),
            "daily" => Ok(BackupFrequency::Daily),
            "weekly" => Ok(BackupFrequency::Weekly),
            other => Err(VaultError::InvalidInput(format!(
                "Unknown backup frequency: {}",
                other
            ))),
        }
    }
}

/// Kind of a stored backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Self-contained snapshot of every configured collection
    Full,
    /// Collections changed since the backup it depends on
    Incremental,
    /// Collections changed since the last full backup
    Differential,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Differential => "differential",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tenant backup policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    pub tenant_id: String,
    pub frequency: BackupFrequency,
    pub retention_days: u32,
    pub compression_level: u32,
    pub encryption_enabled: bool,
    pub data_types: Vec<Collection>,
    pub max_backup_size_bytes: u64,
    pub auto_cleanup: bool,
}

impl BackupConfig {
    /// Default policy for a tenant that was never configured.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            frequency: BackupFrequency::default(),
            retention_days: DEFAULT_RETENTION_DAYS,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            encryption_enabled: true,
            data_types: Collection::CLINICAL.to_vec(),
            max_backup_size_bytes: DEFAULT_MAX_BACKUP_SIZE_BYTES,
            auto_cleanup: true,
        }
    }

    /// Check the policy and normalize `data_types` (sorted, no duplicates).
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Validation` for an empty tenant or data type list,
    /// a non-backupable collection, a compression level above 9, or a zero
    /// retention or size limit.
    pub fn validate(&mut self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(VaultError::Validation(
                "Backup config needs a tenant id".to_string(),
            ));
        }
        if self.data_types.is_empty() {
            return Err(VaultError::Validation(format!(
                "Backup config for {} has no data types",
                self.tenant_id
            )));
        }
        if let Some(bad) = self.data_types.iter().find(|c| !c.is_backupable()) {
            return Err(VaultError::Validation(format!(
                "Collection {} cannot be backed up",
                bad
            )));
        }
        if self.compression_level > 9 {
            return Err(VaultError::Validation(format!(
                "Compression level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if self.retention_days == 0 {
            return Err(VaultError::Validation(
                "Retention must be at least one day".to_string(),
            ));
        }
        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(VaultError::Validation(format!(
                "Retention must be at most {} days, got {}",
                MAX_RETENTION_DAYS, self.retention_days
            )));
        }
        if self.max_backup_size_bytes == 0 {
            return Err(VaultError::Validation(
                "Maximum backup size must be positive".to_string(),
            ));
        }

        let unique: BTreeSet<Collection> = self.data_types.iter().copied().collect();
        self.data_types = unique.into_iter().collect();
        Ok(())
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

/// Metadata of a stored backup. Field names are the export wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub id: String,
    pub tenant_id: String,
    pub timestamp: DateTime<Utc>,
    pub format_version: String,
    pub kind: BackupKind,
    pub data_types: Vec<Collection>,
    pub checksums: BTreeMap<Collection, String>,
    pub size_bytes: u64,
    pub compressed: bool,
    pub encrypted: bool,
    pub dependencies: Vec<String>,
    /// Hash of the stored bytes of a packed or encrypted payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_checksum: Option<String>,
}

/// Selectable restore target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePoint {
    pub backup_id: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub kind: BackupKind,
    pub size_bytes: u64,
    pub can_restore: bool,
    pub required_backups: Vec<String>,
}

/// Options for [`crate::backup::BackupEngine::restore_from_backup`].
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Collections to restore; all collections in the backup when `None`
    pub data_types: Option<Vec<Collection>>,
    /// Delete the tenant's existing records of each restored collection first
    pub overwrite: bool,
    /// Take a full backup before writing anything
    pub create_backup_first: bool,
}

impl RestoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_types(mut self, data_types: Vec<Collection>) -> Self {
        self.data_types = Some(data_types);
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn create_backup_first(mut self, create: bool) -> Self {
        self.create_backup_first = create;
        self
    }
}

/// What a restore did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub backup_id: String,
    /// Backups applied, base first
    pub chain: Vec<String>,
    /// Records written per collection
    pub restored: BTreeMap<Collection, usize>,
    /// Records deleted before or during writing
    pub removed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_backup_id: Option<String>,
}

/// What a retention cleanup did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub deleted: Vec<String>,
    /// Expired backups kept because a retained backup depends on them
    pub retained_for_dependencies: Vec<String>,
}

/// Run state of one tenant's backup lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LaneState {
    Idle,
    Running,
    /// Running, with this many requests waiting behind it
    Queued(usize),
}

impl fmt::Display for LaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneState::Idle => f.write_str("idle"),
            LaneState::Running => f.write_str("running"),
            LaneState::Queued(waiting) => write!(f, "queued ({} waiting)", waiting),
        }
    }
}

/// Aggregate view of a tenant's backups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatistics {
    pub tenant_id: String,
    pub total_backups: usize,
    pub full_backups: usize,
    pub incremental_backups: usize,
    pub differential_backups: usize,
    pub total_size_bytes: u64,
    pub average_size_bytes: u64,
    pub oldest_backup: Option<DateTime<Utc>>,
    pub newest_backup: Option<DateTime<Utc>>,
    pub last_full_backup_id: Option<String>,
    pub lane: LaneState,
}
