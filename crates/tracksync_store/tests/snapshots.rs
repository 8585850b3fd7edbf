//! Export/import round trips through the file store.

use tempfile::tempdir;
use tracksync_protocol::{FingerprintSet, SyncMode};
use tracksync_store::{FileStore, LocalStore, StoreError};

fn set(items: &[&str]) -> FingerprintSet {
    items.iter().copied().collect()
}

#[tokio::test]
async fn export_writes_sorted_json_array() {
    let dir = tempdir().unwrap();
    let store = FileStore::new(dir.path().join("db"));
    store
        .save_fingerprint_set(SyncMode::Pcm, &set(&["cc33", "aa11"]))
        .await
        .unwrap();

    let out = dir.path().join("exports").join("pcm.json");
    store.export_snapshot(SyncMode::Pcm, &out).await.unwrap();

    let written: Vec<String> = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
    assert_eq!(written, vec!["aa11".to_string(), "cc33".to_string()]);
}

#[tokio::test]
async fn import_unions_into_existing_set() {
    let dir = tempdir().unwrap();
    let store = FileStore::new(dir.path().join("db"));
    store
        .save_fingerprint_set(SyncMode::File, &set(&["aa11", "bb22"]))
        .await
        .unwrap();

    let input = dir.path().join("import.json");
    std::fs::write(&input, r#"["BB22", "dd44", ""]"#).unwrap();

    let merged = store.import_json(SyncMode::File, &input).await.unwrap();
    assert_eq!(merged, set(&["aa11", "bb22", "dd44"]));
    assert_eq!(
        store.load_fingerprint_set(SyncMode::File).await.unwrap(),
        merged
    );
}

#[tokio::test]
async fn import_rejects_non_array() {
    let dir = tempdir().unwrap();
    let store = FileStore::new(dir.path());
    store
        .save_fingerprint_set(SyncMode::Pcm, &set(&["aa11"]))
        .await
        .unwrap();

    let input = dir.path().join("bad.json");
    std::fs::write(&input, r#"{"fingerprints": []}"#).unwrap();

    let result = store.import_json(SyncMode::Pcm, &input).await;
    assert!(matches!(result, Err(StoreError::Json(_))));
    assert_eq!(
        store.load_fingerprint_set(SyncMode::Pcm).await.unwrap(),
        set(&["aa11"])
    );
}

#[tokio::test]
async fn reopened_store_sees_latest_save() {
    let dir = tempdir().unwrap();
    {
        let store = FileStore::new(dir.path());
        store
            .save_fingerprint_set(SyncMode::Pcm, &set(&["aa11"]))
            .await
            .unwrap();
        store
            .save_fingerprint_set(SyncMode::Pcm, &set(&["aa11", "bb22"]))
            .await
            .unwrap();
    }

    let reopened = FileStore::new(dir.path());
    assert_eq!(
        reopened.load_fingerprint_set(SyncMode::Pcm).await.unwrap(),
        set(&["aa11", "bb22"])
    );
}
