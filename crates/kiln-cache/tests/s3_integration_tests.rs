//! Integration tests for the S3 backend.
//!
//! These tests require a running S3-compatible server with a `kiln-test` bucket.
//! Run with: `cargo test -p kiln-cache --features integration`
//!
//! To start MinIO: `docker run -p 9000:9000 minio/minio server /data`

#![cfg(feature = "integration")]

use kiln_cache::{Cache, S3Config, S3Store};
use kiln_core::ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;

fn store() -> S3Store {
    S3Store::new(&S3Config {
        endpoint: "http://localhost:9000".into(),
        region: "us-east-1".into(),
        bucket: "kiln-test".into(),
        access_key_id: "minioadmin".into(),
        access_key_secret: "minioadmin".into(),
        path_style: true,
    })
    .expect("s3 store")
}

fn unique_prefix() -> String {
    format!("it/{}/", uuid::Uuid::new_v4())
}

#[tokio::test]
async fn test_put_get_list_delete() {
    let store = store();
    let prefix = unique_prefix();
    let key = format!("{prefix}archive.tgz");

    store.put(&key, b"payload".to_vec()).await.expect("put");
    assert_eq!(store.get(&key).await.expect("get"), b"payload");

    store
        .put(&format!("{prefix}nested/archive.tgz"), b"x".to_vec())
        .await
        .expect("put nested");
    let entries = store.list(&prefix).await.expect("list");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, key);
    assert_eq!(entries[0].size, 7);

    store.delete(&key).await.expect("delete");
    assert!(store.get(&key).await.unwrap_err().is_not_found());
    assert!(store.delete(&key).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_rebuild_restore_roundtrip() {
    let store = Arc::new(store());
    let key = format!("{}archive.tgz", unique_prefix());

    let src = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(src.path().join("deps")).unwrap();
    std::fs::write(src.path().join("deps/lib.txt"), "remote").unwrap();
    Cache::new(store.clone())
        .with_root(src.path())
        .rebuild(&[PathBuf::from("deps")], &key)
        .await
        .expect("rebuild");

    let dst = tempfile::tempdir().unwrap();
    let report = Cache::new(store)
        .with_root(dst.path())
        .restore(&key, &key)
        .await
        .expect("restore");
    assert!(report.is_hit());
    assert_eq!(
        std::fs::read_to_string(dst.path().join("deps/lib.txt")).unwrap(),
        "remote"
    );
}
