//! Typed configuration loaded from TOML.
//!
//! ```toml
//! [store]
//! path = "/var/lib/clinivault/store.age"
//!
//! [cipher]
//! memory_kib = 65536
//! iterations = 3
//! parallelism = 1
//!
//! [[backup]]
//! tenant_id = "clinic-a"
//! frequency = "daily"
//! retention_days = 30
//! data_types = ["patients", "assessments"]
//! ```
//!
//! Every `[[backup]]` field except `tenant_id` is optional and falls back to
//! the defaults of [`BackupConfig::for_tenant`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backup::{BackupConfig, BackupFrequency};
use crate::cipher::KdfParams;
use crate::error::{Result, VaultError};
use crate::storage::Collection;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub cipher: KdfParams,
    #[serde(default, rename = "backup", skip_serializing_if = "Vec::is_empty")]
    pub backups: Vec<BackupSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    /// Sealed durable store; the store lives only in memory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// One `[[backup]]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupSection {
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backup_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_cleanup: Option<bool>,
}

impl BackupSection {
    /// Resolve into a validated [`BackupConfig`].
    ///
    /// # Errors
    ///
    /// Returns `VaultError::CollectionUnknown` for an unknown data type name,
    /// `VaultError::InvalidInput` for an unknown frequency and
    /// `VaultError::Validation` for a policy [`BackupConfig::validate`] rejects.
    pub fn to_backup_config(&self) -> Result<BackupConfig> {
        let mut config = BackupConfig::for_tenant(self.tenant_id.trim());
        if let Some(frequency) = &self.frequency {
            config.frequency = frequency.parse::<BackupFrequency>()?;
        }
        if let Some(days) = self.retention_days {
            config.retention_days = days;
        }
        if let Some(level) = self.compression_level {
            config.compression_level = level;
        }
        if let Some(enabled) = self.encryption_enabled {
            config.encryption_enabled = enabled;
        }
        if let Some(names) = &self.data_types {
            config.data_types = names
                .iter()
                .map(|name| name.parse::<Collection>())
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(limit) = self.max_backup_size_bytes {
            config.max_backup_size_bytes = limit;
        }
        if let Some(auto_cleanup) = self.auto_cleanup {
            config.auto_cleanup = auto_cleanup;
        }
        config.validate()?;
        Ok(config)
    }
}

impl VaultConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| VaultError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            VaultError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            VaultError::Config(msg) => {
                VaultError::Config(format!("Failed to parse config {}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| VaultError::Config(e.to_string()))
    }

    /// Write the config, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        crate::fs::write_atomic(path, self.to_toml_string()?.as_bytes())?;
        Ok(())
    }

    /// Validated backup policies, one per configured tenant.
    pub fn backup_configs(&self) -> Result<Vec<BackupConfig>> {
        let mut seen = HashSet::new();
        let mut configs = Vec::with_capacity(self.backups.len());
        for section in &self.backups {
            let config = section.to_backup_config()?;
            if !seen.insert(config.tenant_id.clone()) {
                return Err(VaultError::Config(format!(
                    "Duplicate backup config for tenant {}",
                    config.tenant_id
                )));
            }
            configs.push(config);
        }
        Ok(configs)
    }

    /// Check every section without building anything.
    pub fn validate(&self) -> Result<()> {
        let KdfParams {
            memory_kib,
            iterations,
            parallelism,
        } = self.cipher;
        if iterations == 0 || parallelism == 0 || memory_kib < 8 * parallelism {
            return Err(VaultError::Config(format!(
                "Invalid cipher parameters: memory_kib={}, iterations={}, parallelism={}",
                memory_kib, iterations, parallelism
            )));
        }
        self.backup_configs()?;
        Ok(())
    }

    /// The `[[backup]]` section of a tenant, added if missing.
    pub fn backup_section_mut(&mut self, tenant_id: &str) -> &mut BackupSection {
        let index = match self.backups.iter().position(|b| b.tenant_id == tenant_id) {
            Some(index) => index,
            None => {
                self.backups.push(BackupSection {
                    tenant_id: tenant_id.to_string(),
                    ..BackupSection::default()
                });
                self.backups.len() - 1
            }
        };
        &mut self.backups[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[store]
path = "/tmp/clinic.age"

[cipher]
memory_kib = 1024
iterations = 1

[[backup]]
tenant_id = "clinic-a"
frequency = "hourly"
retention_days = 7
data_types = ["patients", "exerciseLogs"]

[[backup]]
tenant_id = "clinic-b"
"#;

    #[test]
    fn test_parse_sample() {
        let config = VaultConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/clinic.age")));
        assert_eq!(config.cipher.memory_kib, 1024);
        assert_eq!(config.cipher.parallelism, 1);
        config.validate().unwrap();

        let backups = config.backup_configs().unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].frequency, BackupFrequency::Hourly);
        assert_eq!(backups[0].retention_days, 7);
        assert_eq!(
            backups[0].data_types,
            vec![Collection::Patients, Collection::ExerciseLogs]
        );
        assert_eq!(backups[1], BackupConfig::for_tenant("clinic-b"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = VaultConfig::from_toml_str("").unwrap();
        assert_eq!(config, VaultConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_collection_rejected() {
        let config = VaultConfig::from_toml_str(
            r#"
[[backup]]
tenant_id = "clinic-a"
data_types = ["invoices"]
"#,
        )
        .unwrap();
        assert!(matches!(
            config.backup_configs(),
            Err(VaultError::CollectionUnknown(name)) if name == "invoices"
        ));
    }

    #[test]
    fn test_audit_logs_not_backupable() {
        let config = VaultConfig::from_toml_str(
            r#"
[[backup]]
tenant_id = "clinic-a"
data_types = ["auditLogs"]
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_duplicate_tenant_rejected() {
        let mut config = VaultConfig::default();
        config.backup_section_mut("clinic-a");
        config.backups.push(BackupSection {
            tenant_id: "clinic-a".to_string(),
            ..BackupSection::default()
        });
        assert!(matches!(config.validate(), Err(VaultError::Config(_))));
    }

    #[test]
    fn test_bad_cipher_params_rejected() {
        let mut config = VaultConfig::default();
        config.cipher.iterations = 0;
        assert!(matches!(config.validate(), Err(VaultError::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = VaultConfig::default();
        config.store.path = Some(dir.path().join("store.age"));
        config.backup_section_mut("clinic-a").frequency = Some("weekly".to_string());
        config.save(&path).unwrap();

        let loaded = VaultConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            VaultConfig::from_toml_str("[store"),
            Err(VaultError::Config(_))
        ));
    }
}
