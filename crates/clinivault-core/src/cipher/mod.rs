//! Cryptographic operations for Clinivault.
//!
//! This module provides encryption, key derivation and hashing services using
//! well-audited libraries:
//! - **Argon2id**: Memory-hard key derivation from the caller's master key
//! - **ChaCha20-Poly1305**: Authenticated encryption of payloads
//! - **BLAKE3**: Keyless content hashing for integrity checks
//!
//! ## Security Model
//!
//! - The master key is supplied by the caller for each operation and never stored
//! - Every encryption derives its key from a fresh salt and uses a fresh nonce
//! - Derived key material is zeroized from memory on drop
//! - Hashes are independent of any key, so integrity can be checked without it
//!
//! ## Threat Model
//!
//! We defend against:
//! - Theft of the persisted store or of exported backups
//! - Tampering with stored ciphertext or backup payloads
//!
//! We do NOT defend against:
//! - Compromised OS / keylogger
//! - Access to an unlocked process / memory

pub mod aead;
pub mod hash;
pub mod key;
pub mod passphrase;

pub use aead::{decrypt, encrypt, EncryptedBundle};
pub use hash::{digest_hex, hash, ContentHash};
pub use key::{derive_key, generate_salt, DerivedKey, KdfParams};
pub use passphrase::validate_master_key;

use crate::error::Result;

/// Cipher service holding the KDF cost parameters.
///
/// Constructed once per process and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct Cipher {
    params: KdfParams,
}

impl Cipher {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Derive a key from `master_key` and `salt` with this cipher's parameters.
    pub fn derive_key(&self, master_key: &str, salt: &[u8]) -> Result<DerivedKey> {
        derive_key(master_key, salt, self.params)
    }

    /// Derive a key under a freshly generated salt.
    pub fn fresh_key(&self, master_key: &str) -> Result<DerivedKey> {
        self.derive_key(master_key, &generate_salt())
    }

    pub fn encrypt(&self, plaintext: &[u8], key: &DerivedKey) -> Result<EncryptedBundle> {
        encrypt(plaintext, key)
    }

    pub fn decrypt(&self, bundle: &EncryptedBundle, key: &DerivedKey) -> Result<Vec<u8>> {
        decrypt(bundle, key)
    }

    /// Encrypt with a key derived from `master_key` under a fresh salt.
    pub fn seal(&self, plaintext: &[u8], master_key: &str) -> Result<EncryptedBundle> {
        let key = self.fresh_key(master_key)?;
        encrypt(plaintext, &key)
    }

    /// Decrypt a bundle, re-deriving its key from `master_key` and the bundle's salt.
    pub fn open(&self, bundle: &EncryptedBundle, master_key: &str) -> Result<Vec<u8>> {
        let key = self.derive_key(master_key, &bundle.salt)?;
        decrypt(bundle, &key)
    }

    pub fn hash(&self, bytes: &[u8]) -> ContentHash {
        hash(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaultError;

    #[test]
    fn test_seal_open_round_trip() {
        let cipher = Cipher::new(KdfParams::insecure_fast());
        let bundle = cipher.seal(b"diagnosis: ACL tear", "clinic-master-key").unwrap();
        let plaintext = cipher.open(&bundle, "clinic-master-key").unwrap();
        assert_eq!(plaintext, b"diagnosis: ACL tear");
    }

    #[test]
    fn test_seal_uses_fresh_salt() {
        let cipher = Cipher::new(KdfParams::insecure_fast());
        let first = cipher.seal(b"x", "clinic-master-key").unwrap();
        let second = cipher.seal(b"x", "clinic-master-key").unwrap();
        assert_ne!(first.salt, second.salt);
    }

    #[test]
    fn test_open_with_wrong_master_key_fails() {
        let cipher = Cipher::new(KdfParams::insecure_fast());
        let bundle = cipher.seal(b"x", "clinic-master-key").unwrap();
        assert!(matches!(
            cipher.open(&bundle, "not-the-master-key"),
            Err(VaultError::DecryptionFailure(_))
        ));
    }

    #[test]
    fn test_round_trip_various_payloads() {
        let cipher = Cipher::new(KdfParams::insecure_fast());
        let key = cipher.fresh_key("clinic-master-key").unwrap();
        let payloads: Vec<Vec<u8>> = vec![
            Vec::new(),
            vec![0u8],
            (0..=255u8).collect(),
            vec![0x42; 64 * 1024],
        ];
        for payload in payloads {
            let bundle = cipher.encrypt(&payload, &key).unwrap();
            assert_eq!(cipher.decrypt(&bundle, &key).unwrap(), payload);
        }
    }
}
