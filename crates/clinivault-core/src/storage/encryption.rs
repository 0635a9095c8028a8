//! Age encryption of the persisted durable store.
//!
//! The durable tiers are serialized as one SQLite image and sealed with Age
//! passphrase encryption before touching disk. This is encryption at rest of
//! the whole store and is independent of the per-record payload encryption
//! done by [`crate::cipher`], which the router never performs itself.
//!
//! Age uses scrypt internally for passphrase-based encryption.

use std::io::{Read, Write};
use std::iter;

use age::secrecy::SecretString;

use crate::error::{Result, VaultError};

/// Encrypt a store image using Age passphrase-based encryption.
///
/// # Examples
///
/// ```
/// use clinivault_core::storage::encryption::seal_store;
///
/// let plaintext = b"sqlite image";
/// let sealed = seal_store(plaintext, "store-passphrase-123").unwrap();
/// assert_ne!(sealed.as_slice(), plaintext);
/// ```
pub fn seal_store(data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let encryptor =
        age::Encryptor::with_user_passphrase(SecretString::from(passphrase.to_string()));

    let mut sealed = Vec::new();
    let mut writer = encryptor
        .wrap_output(&mut sealed)
        .map_err(|e| VaultError::EncryptionFailure(format!("Failed to create encryptor: {}", e)))?;

    writer
        .write_all(data)
        .map_err(|e| VaultError::EncryptionFailure(format!("Encryption write failed: {}", e)))?;

    writer
        .finish()
        .map_err(|e| VaultError::EncryptionFailure(format!("Encryption finish failed: {}", e)))?;

    Ok(sealed)
}

/// Decrypt a store image sealed by [`seal_store`].
///
/// # Errors
///
/// Returns `VaultError::DecryptionFailure` if the passphrase is incorrect or
/// the file is corrupted.
pub fn unseal_store(sealed: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let decryptor = age::Decryptor::new(sealed)
        .map_err(|e| VaultError::DecryptionFailure(format!("Failed to create decryptor: {}", e)))?;

    let identity = age::scrypt::Identity::new(SecretString::from(passphrase.to_string()));
    let mut reader = decryptor
        .decrypt(iter::once(&identity as &dyn age::Identity))
        .map_err(|e| match e {
            age::DecryptError::NoMatchingKeys
            | age::DecryptError::DecryptionFailed
            | age::DecryptError::KeyDecryptionFailed => {
                VaultError::DecryptionFailure("Incorrect store passphrase".to_string())
            }
            _ => VaultError::DecryptionFailure(format!("Store decryption failed: {}", e)),
        })?;

    let mut plaintext = Vec::new();
    reader
        .read_to_end(&mut plaintext)
        .map_err(|e| VaultError::DecryptionFailure(format!("Failed to read store: {}", e)))?;

    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal_round_trip() {
        let passphrase = "store-passphrase-123";
        let plaintext = b"SQLite format 3\0 fake image";

        let sealed = seal_store(plaintext, passphrase).unwrap();
        let unsealed = unseal_store(&sealed, passphrase).unwrap();

        assert_eq!(unsealed, plaintext);
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let sealed = seal_store(b"image", "correct-passphrase-123").unwrap();
        let result = unseal_store(&sealed, "wrong-passphrase-456");
        assert!(matches!(result, Err(VaultError::DecryptionFailure(_))));
    }

    #[test]
    fn test_corrupted_store_fails() {
        let passphrase = "store-passphrase-123";
        let mut sealed = seal_store(b"image", passphrase).unwrap();
        let len = sealed.len();
        sealed[len / 2] ^= 0xFF;

        assert!(unseal_store(&sealed, passphrase).is_err());
    }
}
