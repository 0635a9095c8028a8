use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use clinivault_core::VERSION;

/// Clinivault - encrypted, tenant-isolated clinical record storage
#[derive(Parser)]
#[command(name = "clinivault")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the config file
    #[arg(long, global = true, env = "CLINIVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to the sealed store (overrides the config)
    #[arg(long, global = true, env = "CLINIVAULT_STORE")]
    pub store: Option<PathBuf>,

    /// User id recorded in the audit trail
    #[arg(long, global = true, env = "CLINIVAULT_USER", default_value = "cli")]
    pub user: String,

    #[command(subcommand)]
    pub command: Commands,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new sealed store and config
    Init(InitArgs),

    /// Save a record
    Put(PutArgs),

    /// Show a record
    Get(GetArgs),

    /// List a tenant's records in a collection
    List(ListArgs),

    /// Delete a record
    Delete(RecordArgs),

    /// Delete all of a tenant's data (audit trail excepted)
    PurgeTenant(PurgeArgs),

    /// Show per-tier storage usage
    StorageInfo(JsonArgs),

    /// Query a tenant's audit trail
    Audit(AuditArgs),

    /// Manage backups
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Run scheduled backups for every configured tenant until Ctrl-C
    Daemon,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_name = "SHELL")]
        shell: Shell,
    },
}

/// Arguments for the `init` command
#[derive(Args)]
pub struct InitArgs {
    /// Where to create the store (defaults to the XDG data dir)
    #[arg(value_name = "PATH")]
    pub path: Option<PathBuf>,
}

#[derive(Args)]
pub struct TenantArg {
    /// Tenant (clinic) id
    #[arg(short, long, env = "CLINIVAULT_TENANT")]
    pub tenant: String,
}

#[derive(Args)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// A single record addressed by collection and id
#[derive(Args)]
pub struct RecordArgs {
    #[command(flatten)]
    pub tenant: TenantArg,

    /// Collection name (e.g. patients, exerciseLogs)
    #[arg(value_name = "COLLECTION")]
    pub collection: String,

    /// Record id
    #[arg(value_name = "ID")]
    pub id: String,
}

/// Arguments for the `put` command
#[derive(Args)]
pub struct PutArgs {
    #[command(flatten)]
    pub record: RecordArgs,

    /// Public data as a JSON document
    #[arg(long, default_value = "{}")]
    pub data: String,

    /// Sensitive text to encrypt under the master key
    #[arg(long, value_name = "TEXT")]
    pub secret: Option<String>,
}

/// Arguments for the `get` command
#[derive(Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub record: RecordArgs,

    /// Decrypt and include the sensitive payload
    #[arg(long)]
    pub decrypt: bool,

    #[command(flatten)]
    pub output: JsonArgs,
}

/// Arguments for the `list` command
#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub tenant: TenantArg,

    /// Collection name
    #[arg(value_name = "COLLECTION")]
    pub collection: String,

    #[command(flatten)]
    pub output: JsonArgs,
}

/// Arguments for the `purge-tenant` command
#[derive(Args)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub tenant: TenantArg,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}

/// Arguments for the `audit` command
#[derive(Args)]
pub struct AuditArgs {
    #[command(flatten)]
    pub tenant: TenantArg,

    /// Only this action (CREATE, VIEW, UPDATE, DELETE)
    #[arg(long)]
    pub action: Option<String>,

    /// Only this entity type (a collection name, "backup" or "tenant")
    #[arg(long)]
    pub entity_type: Option<String>,

    /// Only this entity id
    #[arg(long)]
    pub entity_id: Option<String>,

    /// Only entries by this user
    #[arg(long)]
    pub by: Option<String>,

    /// Start time (RFC 3339)
    #[arg(long)]
    pub since: Option<String>,

    /// End time (RFC 3339)
    #[arg(long)]
    pub until: Option<String>,

    /// Limit number of results
    #[arg(long)]
    pub limit: Option<usize>,

    #[command(flatten)]
    pub output: JsonArgs,
}

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Take a full backup
    Full {
        #[command(flatten)]
        tenant: TenantArg,

        /// Free-text description
        #[arg(long)]
        description: Option<String>,
    },

    /// Take an incremental backup
    Incremental {
        #[command(flatten)]
        tenant: TenantArg,

        /// Backup to build on (defaults to the newest restorable one)
        #[arg(long, value_name = "ID")]
        since: Option<String>,
    },

    /// Take a differential backup against the latest full backup
    Differential {
        #[command(flatten)]
        tenant: TenantArg,
    },

    /// List restore points, newest first
    List {
        #[command(flatten)]
        tenant: TenantArg,

        #[command(flatten)]
        output: JsonArgs,
    },

    /// Restore a backup
    Restore(RestoreArgs),

    /// Check a backup's integrity
    Verify {
        #[command(flatten)]
        tenant: TenantArg,

        /// Backup id
        #[arg(value_name = "ID")]
        id: String,

        /// Also decrypt and check the payload with the master key
        #[arg(long)]
        deep: bool,
    },

    /// Delete one backup
    Delete {
        #[command(flatten)]
        tenant: TenantArg,

        /// Backup id
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Apply the retention policy
    Cleanup {
        #[command(flatten)]
        tenant: TenantArg,
    },

    /// Show backup statistics
    Stats {
        #[command(flatten)]
        tenant: TenantArg,

        #[command(flatten)]
        output: JsonArgs,
    },

    /// Perform one scheduled run now
    Run {
        #[command(flatten)]
        tenant: TenantArg,
    },
}

/// Arguments for `backup restore`
#[derive(Args)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub tenant: TenantArg,

    /// Backup id
    #[arg(value_name = "ID")]
    pub id: String,

    /// Restrict to these collections
    #[arg(long = "only", value_name = "COLLECTION", value_delimiter = ',')]
    pub only: Vec<String>,

    /// Replace live records instead of merging
    #[arg(long)]
    pub overwrite: bool,

    /// Skip the safety backup taken before restoring
    #[arg(long)]
    pub no_safety_backup: bool,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub yes: bool,
}
