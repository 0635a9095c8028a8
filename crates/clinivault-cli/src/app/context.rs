//! Application context for the Clinivault CLI.
//!
//! Bundles CLI arguments with the lazily loaded config and master key so
//! handlers don't thread them separately.

use std::path::PathBuf;

use once_cell::unsync::OnceCell;
use zeroize::Zeroizing;

use clinivault_core::{ClinicVault, VaultConfig};

use crate::cli::Cli;
use crate::paths::default_config_path;

use super::master_key::read_master_key;

pub struct AppContext<'a> {
    cli: &'a Cli,
    config: OnceCell<VaultConfig>,
    master_key: OnceCell<Zeroizing<String>>,
}

impl<'a> AppContext<'a> {
    pub fn new(cli: &'a Cli) -> Self {
        Self {
            cli,
            config: OnceCell::new(),
            master_key: OnceCell::new(),
        }
    }

    pub fn cli(&self) -> &Cli {
        self.cli
    }

    pub fn quiet(&self) -> bool {
        self.cli.quiet
    }

    /// User id written to the audit trail.
    pub fn user(&self) -> &str {
        &self.cli.user
    }

    /// `--config`/`CLINIVAULT_CONFIG`, else the XDG default.
    pub fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.cli.config {
            Some(path) => Ok(path.clone()),
            None => default_config_path(),
        }
    }

    /// The config file, or defaults when none exists yet.
    pub fn config(&self) -> anyhow::Result<&VaultConfig> {
        self.config.get_or_try_init(|| {
            let path = self.config_path()?;
            if !path.exists() {
                return Ok(VaultConfig::default());
            }
            Ok(VaultConfig::load(&path)?)
        })
    }

    /// `--store`/`CLINIVAULT_STORE`, else the config's `[store] path`.
    pub fn store_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.cli.store {
            return Ok(path.clone());
        }
        let config_path = self.config_path()?;
        self.config()?
            .store
            .path
            .clone()
            .ok_or_else(|| anyhow::anyhow!(missing_store_message(&config_path)))
    }

    pub fn master_key(&self) -> anyhow::Result<&str> {
        let key = self.master_key.get_or_try_init(|| read_master_key(false))?;
        Ok(key.as_str())
    }

    /// Open the sealed store and build the vault over it.
    pub fn open_vault(&self) -> anyhow::Result<ClinicVault> {
        let store = self.store_path()?;
        if !store.exists() {
            return Err(anyhow::anyhow!(
                "No store found at {}\n\nRun:\n  clinivault init",
                store.display()
            ));
        }
        let mut config = self.config()?.clone();
        config.store.path = Some(store);
        Ok(ClinicVault::from_config(&config, self.master_key()?)?)
    }

    /// Seal the store back to disk after a mutation.
    pub fn persist(&self, vault: &ClinicVault) -> anyhow::Result<()> {
        vault.persist(self.master_key()?)?;
        Ok(())
    }
}

fn missing_store_message(config_path: &std::path::Path) -> String {
    format!(
        "No store configured in {}\n\nRun:\n  clinivault init\n\nOr specify a store path:\n  CLINIVAULT_STORE=/path/to/store.age clinivault init",
        config_path.display()
    )
}
