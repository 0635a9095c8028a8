//! # Clinivault Core
//!
//! Encrypted, tenant-isolated record storage for physiotherapy clinics, with
//! an audit trail and full/incremental backups.
//!
//! This crate provides the storage engine, cryptography, audit log and backup
//! engine independent of the CLI interface.
//!
//! ## Architecture
//!
//! - **cipher**: Key derivation, authenticated encryption, content hashing
//! - **storage**: Tenant-scoped CRUD routed over classified tiers
//! - **audit**: Append-only access trail storing hashes, never payloads
//! - **backup**: Snapshots, restore chains, retention and scheduling
//! - **vault**: The service context wiring the above together
//! - **config**: TOML configuration

pub mod audit;
pub mod backup;
pub mod cipher;
pub mod config;
pub mod encoding;
pub mod error;
pub mod fs;
pub mod storage;
pub mod vault;

pub use audit::{AuditAction, AuditEntry, AuditFilter, AuditLog, AuditOutcome};
pub use backup::{BackupConfig, BackupEngine, BackupScheduler, RestoreOptions};
pub use cipher::Cipher;
pub use config::VaultConfig;
pub use error::{Result, VaultError};
pub use storage::{Collection, NewRecord, StorageRouter, TenantScopedRecord};
pub use vault::{Audited, ClinicVault};

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
