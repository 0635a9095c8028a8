//! Clinivault CLI - operator interface to the clinical record vault
//!
//! A thin layer over `clinivault-core`: every command opens the sealed
//! store, performs one audited operation and seals the store again.

mod app;
mod cli;
mod commands;
mod output;
mod paths;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use crate::app::AppContext;
use crate::cli::{Cli, Commands};

const LOG_ENV: &str = "CLINIVAULT_LOG";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(err) = run(&cli).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let ctx = AppContext::new(cli);
    match &cli.command {
        Commands::Init(args) => commands::handle_init(&ctx, args),
        Commands::Put(args) => commands::handle_put(&ctx, args),
        Commands::Get(args) => commands::handle_get(&ctx, args),
        Commands::List(args) => commands::handle_list(&ctx, args),
        Commands::Delete(args) => commands::handle_delete(&ctx, args),
        Commands::PurgeTenant(args) => commands::handle_purge(&ctx, args),
        Commands::StorageInfo(args) => commands::handle_storage_info(&ctx, args),
        Commands::Audit(args) => commands::handle_audit(&ctx, args),
        Commands::Backup(command) => commands::handle_backup(&ctx, command).await,
        Commands::Daemon => commands::handle_daemon(&ctx).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(*shell, &mut cmd, "clinivault", &mut std::io::stdout());
            Ok(())
        }
    }
}
