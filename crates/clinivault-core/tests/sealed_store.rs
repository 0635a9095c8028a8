use serde_json::json;
use tempfile::tempdir;

use clinivault_core::cipher::KdfParams;
use clinivault_core::config::VaultConfig;
use clinivault_core::storage::{Collection, NewRecord, SqliteDatabase};
use clinivault_core::{AuditFilter, ClinicVault, VaultError};

const PASSPHRASE: &str = "correct horse battery staple";

fn config_for(path: std::path::PathBuf) -> VaultConfig {
    let mut config = VaultConfig::default();
    config.store.path = Some(path);
    config.cipher = KdfParams::insecure_fast();
    config
}

#[tokio::test]
async fn test_records_audit_and_backups_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.age");
    SqliteDatabase::create(&path, PASSPHRASE).expect("create should succeed");

    let config = config_for(path.clone());
    let backup_id = {
        let vault = ClinicVault::from_config(&config, PASSPHRASE).expect("open should succeed");
        vault
            .save_record(
                "dr-lima",
                "clinic-a",
                Collection::Patients,
                "p1",
                NewRecord::new(json!({"name": "A. Silva"})),
            )
            .unwrap();
        vault
            .save_record(
                "dr-lima",
                "clinic-a",
                Collection::Drafts,
                "d1",
                NewRecord::new(json!({"note": "unsent"})),
            )
            .unwrap();
        let backup = vault
            .create_full_backup("dr-lima", "clinic-a", PASSPHRASE, None)
            .await
            .unwrap();
        vault.persist(PASSPHRASE).expect("persist should succeed");
        backup.value
    };

    let vault = ClinicVault::from_config(&config, PASSPHRASE).expect("reopen should succeed");
    let storage = vault.storage();
    let patient = storage
        .get(Collection::Patients, "p1", "clinic-a")
        .unwrap()
        .expect("patient should survive reopen");
    assert_eq!(patient.public_data, json!({"name": "A. Silva"}));

    // Drafts never leave the process
    assert!(storage
        .get(Collection::Drafts, "d1", "clinic-a")
        .unwrap()
        .is_none());

    let entries = vault
        .audit()
        .query("clinic-a", &AuditFilter::new())
        .unwrap();
    assert!(entries.len() >= 3);

    assert!(vault
        .backups()
        .verify_backup("clinic-a", &backup_id, Some(PASSPHRASE))
        .unwrap());
}

#[test]
fn test_wrong_passphrase_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.age");
    SqliteDatabase::create(&path, PASSPHRASE).unwrap();

    let result = ClinicVault::from_config(&config_for(path), "not the passphrase");
    assert!(matches!(result, Err(VaultError::DecryptionFailure(_))));
}

#[test]
fn test_missing_store_is_unavailable() {
    let dir = tempdir().unwrap();
    let result = ClinicVault::from_config(&config_for(dir.path().join("absent.age")), PASSPHRASE);
    assert!(matches!(result, Err(VaultError::StorageUnavailable(_))));
}

#[test]
fn test_create_refuses_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.age");
    std::fs::write(&path, b"occupied").unwrap();

    assert!(matches!(
        SqliteDatabase::create(&path, PASSPHRASE),
        Err(VaultError::Storage(_))
    ));
    assert_eq!(std::fs::read(&path).unwrap(), b"occupied");
}
