use secrecy::SecretString;
use tracing::info;

use crate::app::AppContext;

/// Schedule every tenant with a `[[backup]]` section and block until Ctrl-C.
pub async fn handle_daemon(ctx: &AppContext<'_>) -> anyhow::Result<()> {
    let vault = ctx.open_vault()?;
    let tenants = vault.backups().configured_tenants();
    if tenants.is_empty() {
        return Err(anyhow::anyhow!(
            "No tenants configured for backups in {}\n\nAdd a [[backup]] section with a tenant_id.",
            ctx.config_path()?.display()
        ));
    }

    let scheduler = vault
        .scheduler(SecretString::from(ctx.master_key()?.to_string()))
        .persist_after_run(true);
    for tenant in &tenants {
        scheduler.start(tenant);
        if !ctx.quiet() {
            println!(
                "Scheduled {} backups for tenant {}",
                vault.backups().backup_config(tenant).frequency,
                tenant
            );
        }
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to listen for Ctrl-C: {}", e))?;
    info!("shutting down backup scheduler");
    scheduler.stop_all();
    ctx.persist(&vault)?;
    if !ctx.quiet() {
        println!("Stopped");
    }
    Ok(())
}
