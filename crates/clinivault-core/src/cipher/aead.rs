//! Authenticated encryption with ChaCha20-Poly1305.
//!
//! Nonces are always generated here from the OS RNG. There is intentionally
//! no API that accepts a caller-supplied nonce.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::key::{DerivedKey, KEY_LENGTH};
use crate::error::{Result, VaultError};

/// Algorithm label stored in every bundle.
pub const ALGORITHM: &str = "ChaCha20-Poly1305";

/// Nonce length for ChaCha20-Poly1305 (12 bytes).
pub const NONCE_LENGTH: usize = 12;

/// Poly1305 authentication tag length (16 bytes).
pub const TAG_LENGTH: usize = 16;

/// Ciphertext together with everything needed to decrypt it except the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBundle {
    #[serde(with = "crate::encoding::base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub salt: Vec<u8>,
    pub algorithm: String,
    pub key_length_bits: u32,
}

impl EncryptedBundle {
    /// Size of the stored ciphertext in bytes.
    pub fn len(&self) -> usize {
        self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &DerivedKey) -> Result<EncryptedBundle> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut iv = [0u8; NONCE_LENGTH];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| VaultError::EncryptionFailure(format!("AEAD encryption failed: {}", e)))?;

    Ok(EncryptedBundle {
        ciphertext,
        iv: iv.to_vec(),
        salt: key.salt().to_vec(),
        algorithm: ALGORITHM.to_string(),
        key_length_bits: (KEY_LENGTH * 8) as u32,
    })
}

/// Decrypt a bundle. Either the whole plaintext is returned or an error.
///
/// # Errors
///
/// Returns `VaultError::DecryptionFailure` if the algorithm is unknown, the
/// nonce is malformed, the key was derived with a different salt, or the
/// authentication tag does not verify.
pub fn decrypt(bundle: &EncryptedBundle, key: &DerivedKey) -> Result<Vec<u8>> {
    if bundle.algorithm != ALGORITHM {
        return Err(VaultError::DecryptionFailure(format!(
            "Unsupported algorithm: {}",
            bundle.algorithm
        )));
    }
    if bundle.key_length_bits as usize != KEY_LENGTH * 8 {
        return Err(VaultError::DecryptionFailure(format!(
            "Unsupported key length: {} bits",
            bundle.key_length_bits
        )));
    }
    if bundle.iv.len() != NONCE_LENGTH {
        return Err(VaultError::DecryptionFailure(format!(
            "Nonce must be {} bytes (got {})",
            NONCE_LENGTH,
            bundle.iv.len()
        )));
    }
    if bundle.ciphertext.len() < TAG_LENGTH {
        return Err(VaultError::DecryptionFailure(
            "Ciphertext shorter than authentication tag".to_string(),
        ));
    }
    if bundle.salt != key.salt() {
        return Err(VaultError::DecryptionFailure(
            "Key was derived with a different salt".to_string(),
        ));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(&bundle.iv), bundle.ciphertext.as_slice())
        .map_err(|_| VaultError::DecryptionFailure("Authentication tag mismatch".to_string()))
}
