//! Key derivation using Argon2id.
//!
//! Per-operation encryption keys are derived from the caller's master key and
//! a random salt. The salt travels with the ciphertext, so the same key can be
//! re-derived at decryption time.

use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, VaultError};

/// Length of derived key in bytes (32 bytes = 256 bits).
pub const KEY_LENGTH: usize = 32;

/// Length of freshly generated salts in bytes.
pub const SALT_LENGTH: usize = 16;

/// Argon2id cost parameters.
///
/// The defaults balance security and usability:
/// - Memory: 64 MB (64 * 1024 KB)
/// - Iterations: 3
/// - Parallelism: 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal-cost parameters. Only suitable for tests.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(self) -> Result<argon2::Params> {
        argon2::Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| VaultError::Config(format!("Invalid Argon2 params: {}", e)))
    }
}

/// A 256-bit key derived from a master key, bound to the salt it came from.
///
/// Key material is zeroized from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LENGTH],
    salt: Vec<u8>,
}

impl DerivedKey {
    /// Get a reference to the raw key bytes.
    ///
    /// Avoid storing or logging this value.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Salt this key was derived with.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

/// Generate a random salt from the OS RNG.
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive an encryption key from a master key using Argon2id.
///
/// Same master key + salt + params always produce the same key.
pub fn derive_key(master_key: &str, salt: &[u8], params: KdfParams) -> Result<DerivedKey> {
    if master_key.is_empty() {
        return Err(VaultError::InvalidInput(
            "Master key cannot be empty".to_string(),
        ));
    }

    if salt.len() < SALT_LENGTH {
        return Err(VaultError::InvalidInput(format!(
            "Salt must be at least {} bytes",
            SALT_LENGTH
        )));
    }

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        params.to_argon2()?,
    );

    let mut key = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(master_key.as_bytes(), salt, &mut key)
        .map_err(|e| VaultError::EncryptionFailure(format!("Key derivation failed: {}", e)))?;

    Ok(DerivedKey {
        key,
        salt: salt.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8; 16] = b"fixed-salt-12345";

    #[test]
    fn test_key_derivation_deterministic() {
        let params = KdfParams::insecure_fast();
        let key1 = derive_key("clinic-master-key", SALT, params).unwrap();
        let key2 = derive_key("clinic-master-key", SALT, params).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
        assert_eq!(key1.salt(), SALT);
    }

    #[test]
    fn test_different_salt_different_key() {
        let params = KdfParams::insecure_fast();
        let key1 = derive_key("clinic-master-key", b"salt-one-1234567", params).unwrap();
        let key2 = derive_key("clinic-master-key", b"salt-two-1234567", params).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_different_params_different_key() {
        let key1 = derive_key("clinic-master-key", SALT, KdfParams::insecure_fast()).unwrap();
        let key2 = derive_key(
            "clinic-master-key",
            SALT,
            KdfParams {
                iterations: 2,
                ..KdfParams::insecure_fast()
            },
        )
        .unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_empty_master_key_rejected() {
        let result = derive_key("", SALT, KdfParams::insecure_fast());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Master key cannot be empty"));
    }

    #[test]
    fn test_short_salt_rejected() {
        let result = derive_key("clinic-master-key", b"short", KdfParams::insecure_fast());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Salt must be at least 16 bytes"));
    }

    #[test]
    fn test_generated_salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_derived_key_debug_redacts() {
        let key = derive_key("clinic-master-key", SALT, KdfParams::insecure_fast()).unwrap();
        let debug_output = format!("{:?}", key);

        assert!(debug_output.contains("REDACTED"));
        let key_hex = hex::encode(&key.as_bytes()[..4]);
        assert!(!debug_output.contains(&key_hex));
    }
}
