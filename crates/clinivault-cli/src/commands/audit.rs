use chrono::{DateTime, Utc};

use clinivault_core::{AuditAction, AuditFilter};

use crate::app::AppContext;
use crate::cli::AuditArgs;
use crate::output::{print_json, table, yes_no};

pub fn handle_audit(ctx: &AppContext, args: &AuditArgs) -> anyhow::Result<()> {
    let mut filter = AuditFilter::new();
    if let Some(action) = &args.action {
        filter = filter.action(action.to_uppercase().parse::<AuditAction>()?);
    }
    if let Some(entity_type) = &args.entity_type {
        filter = filter.entity_type(entity_type);
    }
    if let Some(entity_id) = &args.entity_id {
        filter = filter.entity_id(entity_id);
    }
    if let Some(user) = &args.by {
        filter = filter.user(user);
    }
    if let Some(since) = &args.since {
        filter = filter.since(parse_time("--since", since)?);
    }
    if let Some(until) = &args.until {
        filter = filter.until(parse_time("--until", until)?);
    }
    if let Some(limit) = args.limit {
        filter = filter.limit(limit);
    }

    let vault = ctx.open_vault()?;
    let entries = vault.audit().query(&args.tenant.tenant, &filter)?;

    if args.output.json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        if !ctx.quiet() {
            println!("No audit entries found.");
        }
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|entry| {
            vec![
                entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                entry.action.to_string(),
                entry.user_id.clone(),
                format!("{}/{}", entry.entity_type, entry.entity_id),
                yes_no(entry.compliance_flag).to_string(),
            ]
        })
        .collect();
    println!(
        "{}",
        table(&["Time", "Action", "User", "Entity", "Compliance"], rows)
    );
    Ok(())
}

fn parse_time(flag: &str, value: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("Invalid {} time {:?}: {}", flag, value, e))
}
