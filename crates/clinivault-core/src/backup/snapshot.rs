//! Stored backup snapshots and their payload framing.
//!
//! A snapshot's body holds, per collection, the tenant's full record list and,
//! for incremental layers, the ids deleted since the layer below. Bodies that
//! are neither compressed nor encrypted are stored inline; otherwise the body
//! is serialized, gzipped and/or sealed, and stored as base64 bytes together
//! with a hash of those bytes, so a sealed snapshot can be checked for
//! tampering without the master key.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::compression;
use super::types::{BackupKind, BackupMetadata};
use crate::cipher::{Cipher, EncryptedBundle};
use crate::error::{Result, VaultError};
use crate::storage::{Collection, TenantScopedRecord};

/// Snapshot format written by this version.
pub const FORMAT_VERSION: &str = "1.0";

/// Decoded snapshot contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBody {
    pub collections: BTreeMap<Collection, Vec<TenantScopedRecord>>,
    /// Ids deleted since the state this layer was taken against
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tombstones: BTreeMap<Collection, BTreeSet<String>>,
}

impl SnapshotBody {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| VaultError::IntegrityFailure(format!("Malformed snapshot body: {}", e)))
    }
}

/// Stored form of a snapshot body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "camelCase")]
pub enum SnapshotData {
    Inline(SnapshotBody),
    /// Gzipped body
    Packed {
        #[serde(with = "crate::encoding::base64_bytes")]
        payload: Vec<u8>,
    },
    /// Sealed body, gzipped first when the metadata says so
    Encrypted { bundle: EncryptedBundle },
}

/// A backup as stored in the `backups` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub metadata: BackupMetadata,
    pub data: SnapshotData,
    #[serde(default)]
    pub description: String,
}

/// Result of framing a body for storage.
pub(crate) struct PackedPayload {
    pub data: SnapshotData,
    pub size_bytes: u64,
    pub compressed: bool,
    pub encrypted: bool,
    pub payload_checksum: Option<String>,
}

/// Hash of a collection's records, over the caller-owned content only.
///
/// Router-managed `lastModified`/`version` are left out, so restoring a
/// collection and backing it up again yields the same checksum.
pub fn collection_checksum(cipher: &Cipher, records: &[TenantScopedRecord]) -> Result<String> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Content<'a> {
        id: &'a str,
        public_data: &'a serde_json::Value,
        encrypted_payload: &'a Option<EncryptedBundle>,
    }

    let mut content: Vec<Content<'_>> = records
        .iter()
        .map(|r| Content {
            id: &r.id,
            public_data: &r.public_data,
            encrypted_payload: &r.encrypted_payload,
        })
        .collect();
    content.sort_by(|a, b| a.id.cmp(b.id));
    Ok(cipher.hash(&serde_json::to_vec(&content)?).digest)
}

/// Frame `body` for storage.
///
/// `compression_level` 0 disables compression; `master_key` enables sealing.
pub(crate) fn pack(
    cipher: &Cipher,
    body: &SnapshotBody,
    compression_level: u32,
    master_key: Option<&str>,
) -> Result<PackedPayload> {
    let compressed = compression_level > 0;
    let encrypted = master_key.is_some();

    if !compressed && !encrypted {
        let size_bytes = body.to_bytes()?.len() as u64;
        return Ok(PackedPayload {
            data: SnapshotData::Inline(body.clone()),
            size_bytes,
            compressed,
            encrypted,
            payload_checksum: None,
        });
    }

    let mut bytes = body.to_bytes()?;
    if compressed {
        bytes = compression::compress(&bytes, compression_level)?;
    }

    let (data, stored) = match master_key {
        Some(master_key) => {
            let bundle = cipher.seal(&bytes, master_key)?;
            let stored = bundle.ciphertext.clone();
            (SnapshotData::Encrypted { bundle }, stored)
        }
        None => (SnapshotData::Packed { payload: bytes.clone() }, bytes),
    };

    Ok(PackedPayload {
        data,
        size_bytes: stored.len() as u64,
        compressed,
        encrypted,
        payload_checksum: Some(cipher.hash(&stored).digest),
    })
}

impl BackupSnapshot {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Keyless integrity check.
    ///
    /// Checks the required metadata, then recomputes the checksum of every
    /// collection present in both `checksums` and the body. Encrypted bodies
    /// are checked against `payloadChecksum` only; their collections are
    /// checked when decoded with the key.
    pub fn verify(&self, cipher: &Cipher) -> bool {
        if !self.metadata_is_well_formed() {
            return false;
        }

        let metadata = &self.metadata;
        match (&self.data, metadata.compressed, metadata.encrypted) {
            (SnapshotData::Inline(body), false, false) => self.body_matches(cipher, body),
            (SnapshotData::Packed { payload }, true, false) => {
                if !self.payload_checksum_matches(cipher, payload) {
                    return false;
                }
                compression::decompress(payload)
                    .and_then(|bytes| SnapshotBody::from_bytes(&bytes))
                    .map(|body| self.body_matches(cipher, &body))
                    .unwrap_or(false)
            }
            (SnapshotData::Encrypted { bundle }, _, true) => {
                self.payload_checksum_matches(cipher, &bundle.ciphertext)
            }
            _ => false,
        }
    }

    fn metadata_is_well_formed(&self) -> bool {
        let m = &self.metadata;
        let data_types: BTreeSet<Collection> = m.data_types.iter().copied().collect();

        !m.id.trim().is_empty()
            && !m.tenant_id.trim().is_empty()
            && m.format_version == FORMAT_VERSION
            && !data_types.is_empty()
            && data_types.iter().all(Collection::is_backupable)
            && m.checksums.keys().all(|c| data_types.contains(c))
            && match m.kind {
                BackupKind::Full => m.dependencies.is_empty(),
                BackupKind::Incremental | BackupKind::Differential => {
                    !m.dependencies.is_empty() && !m.dependencies.contains(&m.id)
                }
            }
    }

    fn payload_checksum_matches(&self, cipher: &Cipher, stored: &[u8]) -> bool {
        self.metadata
            .payload_checksum
            .as_deref()
            .map_or(false, |expected| cipher.hash(stored).digest == expected)
    }

    fn body_matches(&self, cipher: &Cipher, body: &SnapshotBody) -> bool {
        let m = &self.metadata;
        let tombstones_covered = body
            .tombstones
            .keys()
            .all(|c| m.data_types.contains(c));

        tombstones_covered
            && body.collections.iter().all(|(collection, records)| {
                let Some(expected) = m.checksums.get(collection) else {
                    return false;
                };
                records.iter().all(|r| r.tenant_id == m.tenant_id)
                    && collection_checksum(cipher, records)
                        .map_or(false, |actual| &actual == expected)
            })
    }

    /// Decode the body, decrypting with `master_key` when the snapshot is sealed.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::DecryptionFailure` for a missing or wrong key and
    /// `VaultError::IntegrityFailure` if the decoded body does not match the
    /// stored checksums.
    pub fn decode(&self, cipher: &Cipher, master_key: Option<&str>) -> Result<SnapshotBody> {
        let body = match &self.data {
            SnapshotData::Inline(body) => body.clone(),
            SnapshotData::Packed { payload } => {
                SnapshotBody::from_bytes(&compression::decompress(payload)?)?
            }
            SnapshotData::Encrypted { bundle } => {
                let master_key = master_key.ok_or_else(|| {
                    VaultError::DecryptionFailure(format!(
                        "Backup {} is encrypted and no master key was given",
                        self.metadata.id
                    ))
                })?;
                let mut bytes = cipher.open(bundle, master_key)?;
                if self.metadata.compressed {
                    bytes = compression::decompress(&bytes)?;
                }
                SnapshotBody::from_bytes(&bytes)?
            }
        };

        if !self.body_matches(cipher, &body) {
            return Err(VaultError::IntegrityFailure(format!(
                "Backup {} contents do not match their checksums",
                self.metadata.id
            )));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::KdfParams;
    use chrono::Utc;
    use serde_json::json;

    fn record(id: &str, name: &str) -> TenantScopedRecord {
        TenantScopedRecord {
            id: id.to_string(),
            tenant_id: "t1".to_string(),
            public_data: json!({ "name": name }),
            encrypted_payload: None,
            last_modified: Utc::now(),
            version: 1,
        }
    }

    fn snapshot(cipher: &Cipher, level: u32, master_key: Option<&str>) -> BackupSnapshot {
        let records = vec![record("p1", "A. Silva"), record("p2", "B. Costa")];
        let checksum = collection_checksum(cipher, &records).unwrap();
        let body = SnapshotBody {
            collections: BTreeMap::from([(Collection::Patients, records)]),
            tombstones: BTreeMap::new(),
        };
        let packed = pack(cipher, &body, level, master_key).unwrap();
        BackupSnapshot {
            metadata: BackupMetadata {
                id: "b1".to_string(),
                tenant_id: "t1".to_string(),
                timestamp: Utc::now(),
                format_version: FORMAT_VERSION.to_string(),
                kind: BackupKind::Full,
                data_types: vec![Collection::Patients],
                checksums: BTreeMap::from([(Collection::Patients, checksum)]),
                size_bytes: packed.size_bytes,
                compressed: packed.compressed,
                encrypted: packed.encrypted,
                dependencies: Vec::new(),
                payload_checksum: packed.payload_checksum,
            },
            data: packed.data,
            description: String::new(),
        }
    }

    fn cipher() -> Cipher {
        Cipher::new(KdfParams::insecure_fast())
    }

    #[test]
    fn test_checksum_ignores_order_and_router_fields() {
        let cipher = cipher();
        let a = vec![record("p1", "A"), record("p2", "B")];
        let mut b = vec![record("p2", "B"), record("p1", "A")];
        b[0].version = 7;
        assert_eq!(
            collection_checksum(&cipher, &a).unwrap(),
            collection_checksum(&cipher, &b).unwrap()
        );

        b[1].public_data = json!({"name": "changed"});
        assert_ne!(
            collection_checksum(&cipher, &a).unwrap(),
            collection_checksum(&cipher, &b).unwrap()
        );
    }

    #[test]
    fn test_inline_snapshot_verifies_and_detects_tampering() {
        let cipher = cipher();
        let mut snap = snapshot(&cipher, 0, None);
        assert!(matches!(snap.data, SnapshotData::Inline(_)));
        assert!(snap.verify(&cipher));

        if let SnapshotData::Inline(body) = &mut snap.data {
            body.collections.get_mut(&Collection::Patients).unwrap()[0].public_data =
                json!({"name": "tampered"});
        }
        assert!(!snap.verify(&cipher));
    }

    #[test]
    fn test_packed_snapshot_round_trip() {
        let cipher = cipher();
        let snap = snapshot(&cipher, 6, None);
        assert!(matches!(snap.data, SnapshotData::Packed { .. }));
        assert!(snap.verify(&cipher));
        let body = snap.decode(&cipher, None).unwrap();
        assert_eq!(body.collections[&Collection::Patients].len(), 2);
    }

    #[test]
    fn test_encrypted_snapshot_needs_key() {
        let cipher = cipher();
        let snap = snapshot(&cipher, 6, Some("clinic-master-key"));
        assert!(snap.verify(&cipher));

        assert!(matches!(
            snap.decode(&cipher, None),
            Err(VaultError::DecryptionFailure(_))
        ));
        assert!(matches!(
            snap.decode(&cipher, Some("wrong-master-key")),
            Err(VaultError::DecryptionFailure(_))
        ));
        let body = snap.decode(&cipher, Some("clinic-master-key")).unwrap();
        assert_eq!(body.collections[&Collection::Patients][1].id, "p2");
    }

    #[test]
    fn test_encrypted_payload_tamper_detected_without_key() {
        let cipher = cipher();
        let mut snap = snapshot(&cipher, 0, Some("clinic-master-key"));
        if let SnapshotData::Encrypted { bundle } = &mut snap.data {
            bundle.ciphertext[0] ^= 0xff;
        }
        assert!(!snap.verify(&cipher));
    }

    #[test]
    fn test_flags_must_match_framing() {
        let cipher = cipher();
        let mut snap = snapshot(&cipher, 0, None);
        snap.metadata.compressed = true;
        assert!(!snap.verify(&cipher));
    }

    #[test]
    fn test_incremental_without_dependencies_is_malformed() {
        let cipher = cipher();
        let mut snap = snapshot(&cipher, 0, None);
        snap.metadata.kind = BackupKind::Incremental;
        assert!(!snap.verify(&cipher));
        snap.metadata.dependencies = vec!["b0".to_string()];
        assert!(snap.verify(&cipher));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let cipher = cipher();
        let snap = snapshot(&cipher, 0, None);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["data"]["encoding"], "inline");
        assert_eq!(json["data"]["collections"]["patients"][0]["id"], "p1");
        assert_eq!(json["metadata"]["kind"], "full");

        let parsed: BackupSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, snap);
    }
}
