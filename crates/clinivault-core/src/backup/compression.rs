//! Gzip framing for backup payloads.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, VaultError};

/// Upper bound on a decompressed payload, guarding against gzip bombs.
pub const MAX_DECOMPRESSED_BYTES: u64 = 1024 * 1024 * 1024;

/// Gzip `data` at `level` (1-9).
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    if !(1..=9).contains(&level) {
        return Err(VaultError::Compression(format!(
            "Invalid compression level: {}",
            level
        )));
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| VaultError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| VaultError::Compression(e.to_string()))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(MAX_DECOMPRESSED_BYTES + 1)
        .read_to_end(&mut out)
        .map_err(|e| VaultError::Compression(format!("Corrupt gzip payload: {}", e)))?;
    if out.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return Err(VaultError::Compression(
            "Decompressed payload exceeds limit".to_string(),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_shrinks_repetitive_payload() {
        let data = br#"{"name":"A. Silva","plan":"knee rehab"}"#.repeat(200);
        let packed = compress(&data, 6).unwrap();
        assert!(packed.len() < data.len() / 4);
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_invalid_level_rejected() {
        assert!(matches!(
            compress(b"x", 0),
            Err(VaultError::Compression(_))
        ));
        assert!(compress(b"x", 10).is_err());
    }

    #[test]
    fn test_decompress_garbage_fails() {
        assert!(matches!(
            decompress(b"definitely not gzip"),
            Err(VaultError::Compression(_))
        ));
    }
}
