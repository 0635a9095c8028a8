use std::io::IsTerminal;

use secrecy::SecretString;

use clinivault_core::backup::{BackupStatistics, RestoreOptions, RestorePoint};
use clinivault_core::ClinicVault;

use crate::app::AppContext;
use crate::cli::{BackupCommand, RestoreArgs};
use crate::output::{audited, format_bytes, print_json, table, yes_no};

use super::parse_collection;

pub async fn handle_backup(ctx: &AppContext<'_>, command: &BackupCommand) -> anyhow::Result<()> {
    let vault = ctx.open_vault()?;
    match command {
        BackupCommand::Full {
            tenant,
            description,
        } => {
            let id = audited(
                vault
                    .create_full_backup(
                        ctx.user(),
                        &tenant.tenant,
                        ctx.master_key()?,
                        description.as_deref(),
                    )
                    .await?,
            );
            ctx.persist(&vault)?;
            report_created(ctx, "full", &id, true);
        }
        BackupCommand::Incremental { tenant, since } => {
            let base = match since {
                Some(id) => id.clone(),
                None => latest_restorable(&vault, &tenant.tenant)?,
            };
            let id = audited(
                vault
                    .create_incremental_backup(
                        ctx.user(),
                        &tenant.tenant,
                        ctx.master_key()?,
                        &base,
                    )
                    .await?,
            );
            let created = id != base;
            if created {
                ctx.persist(&vault)?;
            }
            report_created(ctx, "incremental", &id, created);
        }
        BackupCommand::Differential { tenant } => {
            let before = vault.backups().get_backup_statistics(&tenant.tenant)?.total_backups;
            let id = audited(
                vault
                    .create_differential_backup(ctx.user(), &tenant.tenant, ctx.master_key()?)
                    .await?,
            );
            let created = vault.backups().get_backup_statistics(&tenant.tenant)?.total_backups
                > before;
            if created {
                ctx.persist(&vault)?;
            }
            report_created(ctx, "differential", &id, created);
        }
        BackupCommand::List { tenant, output } => {
            let points = vault.backups().get_restore_points(&tenant.tenant)?;
            if output.json {
                return print_json(&points);
            }
            print_restore_points(ctx, &points);
        }
        BackupCommand::Restore(args) => handle_restore(ctx, &vault, args).await?,
        BackupCommand::Verify { tenant, id, deep } => {
            let key = if *deep { Some(ctx.master_key()?) } else { None };
            if !vault.backups().verify_backup(&tenant.tenant, id, key)? {
                eprintln!("Integrity check: FAILED");
                eprintln!("Hint: restore from an earlier backup or take a new full backup.");
                return Err(anyhow::anyhow!("Backup {} failed verification", id));
            }
            if !ctx.quiet() {
                println!("Integrity check: OK");
            }
        }
        BackupCommand::Delete { tenant, id } => {
            audited(vault.delete_backup(ctx.user(), &tenant.tenant, id).await?);
            ctx.persist(&vault)?;
            if !ctx.quiet() {
                println!("Deleted backup {}", id);
            }
        }
        BackupCommand::Cleanup { tenant } => {
            let report = vault.backups().cleanup_old_backups(&tenant.tenant).await?;
            if !report.deleted.is_empty() {
                ctx.persist(&vault)?;
            }
            if !ctx.quiet() {
                println!("Deleted {} expired backup(s)", report.deleted.len());
                for id in &report.retained_for_dependencies {
                    println!("Kept {} (required by a retained backup)", id);
                }
            }
        }
        BackupCommand::Stats { tenant, output } => {
            let stats = vault.backups().get_backup_statistics(&tenant.tenant)?;
            if output.json {
                return print_json(&stats);
            }
            print_statistics(&stats);
        }
        BackupCommand::Run { tenant } => {
            let scheduler = vault
                .scheduler(SecretString::from(ctx.master_key()?.to_string()))
                .persist_after_run(true);
            let run = scheduler.run_once(&tenant.tenant).await?;
            if !ctx.quiet() {
                report_created(ctx, run.kind.as_str(), &run.backup_id, run.created);
                if !run.cleanup.deleted.is_empty() {
                    println!("Deleted {} expired backup(s)", run.cleanup.deleted.len());
                }
            }
        }
    }
    Ok(())
}

async fn handle_restore(
    ctx: &AppContext<'_>,
    vault: &ClinicVault,
    args: &RestoreArgs,
) -> anyhow::Result<()> {
    let tenant = &args.tenant.tenant;
    let mut options = RestoreOptions::new()
        .overwrite(args.overwrite)
        .create_backup_first(!args.no_safety_backup);
    if !args.only.is_empty() {
        let types = args
            .only
            .iter()
            .map(|name| parse_collection(name))
            .collect::<anyhow::Result<Vec<_>>>()?;
        options = options.data_types(types);
    }

    if args.overwrite && !args.yes && std::io::stdin().is_terminal() {
        let proceed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Replace tenant {}'s live records with backup {}?",
                tenant, args.id
            ))
            .default(false)
            .interact()?;
        if !proceed {
            return Err(anyhow::anyhow!("Restore cancelled"));
        }
    }

    let report = audited(
        vault
            .restore_from_backup(ctx.user(), &args.id, tenant, ctx.master_key()?, options)
            .await?,
    );
    ctx.persist(vault)?;

    if !ctx.quiet() {
        if let Some(safety) = &report.safety_backup_id {
            println!("Safety backup: {}", safety);
        }
        for (collection, count) in &report.restored {
            println!("Restored {} {}", count, collection);
        }
        if report.removed > 0 {
            println!("Removed {} record(s)", report.removed);
        }
        println!("Restored backup {} (chain of {})", report.backup_id, report.chain.len());
    }
    Ok(())
}

fn latest_restorable(vault: &ClinicVault, tenant: &str) -> anyhow::Result<String> {
    vault
        .backups()
        .get_restore_points(tenant)?
        .into_iter()
        .find(|point| point.can_restore)
        .map(|point| point.backup_id)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No restorable backup for tenant {}\n\nRun:\n  clinivault backup full --tenant {}",
                tenant,
                tenant
            )
        })
}

fn report_created(ctx: &AppContext, kind: &str, id: &str, created: bool) {
    if ctx.quiet() {
        println!("{}", id);
    } else if created {
        println!("Created {} backup {}", kind, id);
    } else {
        println!("No changes since backup {}", id);
    }
}

fn print_restore_points(ctx: &AppContext, points: &[RestorePoint]) {
    if points.is_empty() {
        if !ctx.quiet() {
            println!("No backups found.");
        }
        return;
    }
    let rows = points
        .iter()
        .map(|point| {
            vec![
                point.backup_id.clone(),
                point.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                point.kind.to_string(),
                format_bytes(point.size_bytes),
                yes_no(point.can_restore).to_string(),
                point.description.clone(),
            ]
        })
        .collect();
    println!(
        "{}",
        table(
            &["ID", "Time", "Kind", "Size", "Restorable", "Description"],
            rows
        )
    );
}

fn print_statistics(stats: &BackupStatistics) {
    let time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };
    println!("Tenant: {}", stats.tenant_id);
    println!(
        "Backups: {} ({} full, {} incremental, {} differential)",
        stats.total_backups,
        stats.full_backups,
        stats.incremental_backups,
        stats.differential_backups
    );
    println!(
        "Size: {} total, {} average",
        format_bytes(stats.total_size_bytes),
        format_bytes(stats.average_size_bytes)
    );
    println!("Oldest: {}", time(stats.oldest_backup));
    println!("Newest: {}", time(stats.newest_backup));
    println!(
        "Last full: {}",
        stats.last_full_backup_id.as_deref().unwrap_or("-")
    );
    println!("Lane: {}", stats.lane);
}
