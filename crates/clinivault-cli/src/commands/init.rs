use clinivault_core::storage::SqliteDatabase;

use crate::app::{read_master_key, AppContext};
use crate::cli::InitArgs;
use crate::paths::default_store_path;

pub fn handle_init(ctx: &AppContext, args: &InitArgs) -> anyhow::Result<()> {
    let config_path = ctx.config_path()?;
    let mut config = ctx.config()?.clone();

    let store = match args
        .path
        .clone()
        .or_else(|| ctx.cli().store.clone())
        .or_else(|| config.store.path.clone())
    {
        Some(path) => path,
        None => default_store_path()?,
    };
    if store.exists() {
        return Err(anyhow::anyhow!(
            "A store already exists at {}",
            store.display()
        ));
    }
    if let Some(parent) = store.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            anyhow::anyhow!("Failed to create store directory {}: {}", parent.display(), e)
        })?;
    }

    let master_key = read_master_key(true)?;
    SqliteDatabase::create(&store, &master_key)?;

    config.store.path = Some(store.clone());
    config.save(&config_path)?;

    if !ctx.quiet() {
        println!("Initialized clinivault store at {}", store.display());
        println!("Config written to {}", config_path.display());
    }
    Ok(())
}
