use std::io::IsTerminal;

use serde_json::Value;

use clinivault_core::storage::{NewRecord, Tier, TenantScopedRecord};

use crate::app::AppContext;
use crate::cli::{GetArgs, JsonArgs, ListArgs, PurgeArgs, PutArgs, RecordArgs};
use crate::output::{audited, format_bytes, print_json, table, yes_no};

use super::parse_collection;

pub fn handle_put(ctx: &AppContext, args: &PutArgs) -> anyhow::Result<()> {
    let collection = parse_collection(&args.record.collection)?;
    let data: Value = serde_json::from_str(&args.data)
        .map_err(|e| anyhow::anyhow!("Invalid --data JSON: {}", e))?;
    let tenant = &args.record.tenant.tenant;
    let id = &args.record.id;

    let vault = ctx.open_vault()?;
    let saved = match &args.secret {
        Some(secret) => vault.save_sensitive(
            ctx.user(),
            tenant,
            collection,
            id,
            data,
            secret.as_bytes(),
            ctx.master_key()?,
        )?,
        None => vault.save_record(ctx.user(), tenant, collection, id, NewRecord::new(data))?,
    };
    let record = audited(saved);
    ctx.persist(&vault)?;

    if collection.tier() == Tier::Ephemeral {
        eprintln!("Note: {} are kept in memory only and end with this process", collection);
    }
    if !ctx.quiet() {
        println!(
            "Saved {}/{} (version {})",
            collection, record.id, record.version
        );
    }
    Ok(())
}

pub fn handle_get(ctx: &AppContext, args: &GetArgs) -> anyhow::Result<()> {
    let collection = parse_collection(&args.record.collection)?;
    let tenant = &args.record.tenant.tenant;
    let id = &args.record.id;

    let vault = ctx.open_vault()?;
    let record = audited(vault.get_record(ctx.user(), tenant, collection, id)?)
        .ok_or_else(|| anyhow::anyhow!("Record not found: {}/{}", collection, id))?;
    let plaintext = if args.decrypt {
        let bytes = vault.open_payload(&record, ctx.master_key()?)?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        None
    };
    ctx.persist(&vault)?;

    if args.output.json {
        let mut value = serde_json::to_value(&record)?;
        if let Some(plaintext) = plaintext {
            value["payload"] = Value::String(plaintext);
        }
        return print_json(&value);
    }

    if !ctx.quiet() {
        println!("ID: {}", record.id);
        println!("Tenant: {}", record.tenant_id);
        println!("Version: {}", record.version);
        println!("Modified: {}", record.last_modified.to_rfc3339());
        println!("Encrypted: {}", yes_no(record.encrypted_payload.is_some()));
        println!();
    }
    println!("{}", serde_json::to_string_pretty(&record.public_data)?);
    if let Some(plaintext) = plaintext {
        println!("{}", plaintext);
    }
    Ok(())
}

pub fn handle_list(ctx: &AppContext, args: &ListArgs) -> anyhow::Result<()> {
    let collection = parse_collection(&args.collection)?;
    let vault = ctx.open_vault()?;
    let records = audited(vault.list_records(ctx.user(), &args.tenant.tenant, collection)?);
    ctx.persist(&vault)?;

    if args.output.json {
        return print_json(&records);
    }
    if records.is_empty() {
        if !ctx.quiet() {
            println!("No records found.");
        }
        return Ok(());
    }
    println!("{}", table(&["ID", "Version", "Modified", "Encrypted"], record_rows(&records)));
    Ok(())
}

fn record_rows(records: &[TenantScopedRecord]) -> Vec<Vec<String>> {
    records
        .iter()
        .map(|record| {
            vec![
                record.id.clone(),
                record.version.to_string(),
                record.last_modified.format("%Y-%m-%d %H:%M:%S").to_string(),
                yes_no(record.encrypted_payload.is_some()).to_string(),
            ]
        })
        .collect()
}

pub fn handle_delete(ctx: &AppContext, args: &RecordArgs) -> anyhow::Result<()> {
    let collection = parse_collection(&args.collection)?;
    let vault = ctx.open_vault()?;
    let removed = audited(vault.delete_record(ctx.user(), &args.tenant.tenant, collection, &args.id)?);
    if !removed {
        return Err(anyhow::anyhow!("Record not found: {}/{}", collection, args.id));
    }
    ctx.persist(&vault)?;
    if !ctx.quiet() {
        println!("Deleted {}/{}", collection, args.id);
    }
    Ok(())
}

pub fn handle_purge(ctx: &AppContext, args: &PurgeArgs) -> anyhow::Result<()> {
    let tenant = &args.tenant.tenant;
    if !args.yes {
        if !std::io::stdin().is_terminal() {
            return Err(anyhow::anyhow!(
                "Refusing to purge tenant {} without confirmation. Pass --yes.",
                tenant
            ));
        }
        let proceed = dialoguer::Confirm::new()
            .with_prompt(format!("Delete ALL data of tenant {}?", tenant))
            .default(false)
            .interact()?;
        if !proceed {
            return Err(anyhow::anyhow!("Purge cancelled"));
        }
    }

    let vault = ctx.open_vault()?;
    let removed = audited(vault.purge_tenant(ctx.user(), tenant)?);
    ctx.persist(&vault)?;
    if !ctx.quiet() {
        println!("Purged tenant {} ({} records removed)", tenant, removed);
    }
    Ok(())
}

pub fn handle_storage_info(ctx: &AppContext, args: &JsonArgs) -> anyhow::Result<()> {
    let vault = ctx.open_vault()?;
    let info = vault.storage().get_storage_info()?;
    if args.json {
        return print_json(&info);
    }

    let rows = Tier::ALL
        .iter()
        .map(|tier| {
            let usage = info.tier(*tier);
            vec![
                tier.as_str().to_string(),
                usage.records.to_string(),
                format_bytes(usage.bytes),
            ]
        })
        .collect();
    println!("{}", table(&["Tier", "Records", "Size"], rows));
    if !ctx.quiet() {
        println!("Total: {}", format_bytes(info.total_bytes()));
    }
    Ok(())
}
