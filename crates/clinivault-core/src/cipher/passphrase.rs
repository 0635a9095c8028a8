//! Master key validation.
//!
//! Enforces minimum requirements for caller-supplied master keys and for the
//! passphrase that seals the durable store.

use crate::error::{Result, VaultError};

/// Minimum master key length in characters.
const MIN_MASTER_KEY_LENGTH: usize = 8;

/// Validate a master key meets minimum requirements.
///
/// # Requirements
///
/// - At least 8 characters long
/// - Not empty or only whitespace
///
/// # Examples
///
/// ```
/// use clinivault_core::cipher::validate_master_key;
///
/// assert!(validate_master_key("clinic-master-key-123").is_ok());
/// assert!(validate_master_key("short").is_err());
/// ```
pub fn validate_master_key(master_key: &str) -> Result<()> {
    if master_key.trim().is_empty() {
        return Err(VaultError::InvalidInput(
            "Master key cannot be empty".to_string(),
        ));
    }

    let length = master_key.chars().count();
    if length < MIN_MASTER_KEY_LENGTH {
        return Err(VaultError::InvalidInput(format!(
            "Master key must be at least {} characters (got {})",
            MIN_MASTER_KEY_LENGTH, length
        )));
    }

    Ok(())
}
