mod audit;
mod backup;
mod daemon;
mod init;
mod records;

pub use audit::handle_audit;
pub use backup::handle_backup;
pub use daemon::handle_daemon;
pub use init::handle_init;
pub use records::{
    handle_delete, handle_get, handle_list, handle_purge, handle_put, handle_storage_info,
};

use clinivault_core::Collection;

pub(crate) fn parse_collection(name: &str) -> anyhow::Result<Collection> {
    Ok(name.parse::<Collection>()?)
}
