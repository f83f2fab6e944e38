use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use certstore_core::{LockConfig, StorageConfig};
use certstore_storage::{CancellationToken, CertStorage, MemoryBackend, ObjectStorage, Operation};

fn storage(prefix: &str) -> (MemoryBackend, ObjectStorage) {
    let backend = MemoryBackend::new("integration");
    let storage = ObjectStorage::new(Arc::new(backend.clone()), prefix, LockConfig::default())
        .expect("valid lock config");
    (backend, storage)
}

#[tokio::test]
async fn test_certificate_lifecycle() -> Result<()> {
    let (backend, storage) = storage("caddy");
    let cancel = CancellationToken::new();
    let key = "certificates/acme-v02/example.com/example.com.crt";
    let pem = Bytes::from_static(b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n");

    assert!(!storage.exists(key, &cancel).await);

    storage.store(key, pem.clone(), &cancel).await?;
    assert_eq!(backend.paths(), vec![format!("caddy/{}", key)]);
    assert!(storage.exists(key, &cancel).await);
    assert_eq!(storage.load(key, &cancel).await?, pem);

    let info = storage.stat(key, &cancel).await?;
    assert_eq!(info.key, key);
    assert_eq!(info.size, pem.len() as u64);
    assert!(info.is_terminal);

    storage.delete(key, &cancel).await?;
    assert!(!storage.exists(key, &cancel).await);
    Ok(())
}

#[tokio::test]
async fn test_store_overwrites_and_keeps_bytes_exact() -> Result<()> {
    let (_, storage) = storage("");
    let cancel = CancellationToken::new();
    let binary: Vec<u8> = (0..=255u8).collect();

    storage.store("k", Bytes::from("first"), &cancel).await?;
    storage.store("k", Bytes::from(binary.clone()), &cancel).await?;
    assert_eq!(storage.load("k", &cancel).await?.as_ref(), binary.as_slice());

    storage.store("empty", Bytes::new(), &cancel).await?;
    assert!(storage.load("empty", &cancel).await?.is_empty());
    assert_eq!(storage.stat("empty", &cancel).await?.size, 0);
    Ok(())
}

#[tokio::test]
async fn test_missing_keys() {
    let (_, storage) = storage("caddy");
    let cancel = CancellationToken::new();

    let err = storage.load("nope", &cancel).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "Object not found: nope");

    assert!(storage.stat("nope", &cancel).await.unwrap_err().is_not_found());
    assert!(!storage.exists("nope", &cancel).await);
}

#[tokio::test]
async fn test_delete_is_idempotent() -> Result<()> {
    let (_, storage) = storage("caddy");
    let cancel = CancellationToken::new();

    storage.store("k", Bytes::from("v"), &cancel).await?;
    storage.delete("k", &cancel).await?;
    storage.delete("k", &cancel).await?;
    assert!(!storage.exists("k", &cancel).await);
    Ok(())
}

#[tokio::test]
async fn test_list_directory_and_recursive() -> Result<()> {
    let (_, storage) = storage("caddy");
    let cancel = CancellationToken::new();

    for key in ["a/x", "a/y/z", "a/y/w", "b/q"] {
        storage.store(key, Bytes::from(key.to_string()), &cancel).await?;
    }

    let shallow = storage.list("a/", false, &cancel).await?;
    assert_eq!(shallow, vec!["a/x".to_string(), "a/y/".to_string()]);

    let mut deep = storage.list("a/", true, &cancel).await?;
    deep.sort();
    assert_eq!(deep, vec!["a/x", "a/y/w", "a/y/z"]);

    // Listing results are valid keys for the other operations
    for key in &deep {
        assert!(storage.exists(key, &cancel).await);
    }

    assert!(storage.list("missing/", true, &cancel).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_list_walks_every_page() -> Result<()> {
    let backend = MemoryBackend::new("integration").with_page_cap(1000);
    let storage = ObjectStorage::new(Arc::new(backend.clone()), "caddy", LockConfig::default())?;
    let cancel = CancellationToken::new();

    for i in 0..2500 {
        storage.store(&format!("certs/{:05}", i), Bytes::from("x"), &cancel).await?;
    }

    let keys = storage.list("certs", true, &cancel).await?;
    let unique: HashSet<_> = keys.iter().collect();
    assert_eq!(keys.len(), 2500);
    assert_eq!(unique.len(), 2500);
    assert_eq!(backend.request_count(Operation::List), 3);
    Ok(())
}

#[tokio::test]
async fn test_with_backend_uses_config_prefix() -> Result<()> {
    let backend = MemoryBackend::new("certs-1250000000");
    let config = StorageConfig::new("certs-1250000000", "ap-nanjing").with_prefix("/tenant-a/");
    let storage = ObjectStorage::with_backend(backend.clone(), &config)?;
    let cancel = CancellationToken::new();

    storage.store("acme/account.json", Bytes::from("{}"), &cancel).await?;
    assert_eq!(backend.paths(), vec!["tenant-a/acme/account.json"]);
    assert_eq!(storage.list("", true, &cancel).await?, vec!["acme/account.json"]);
    Ok(())
}

#[tokio::test]
async fn test_transport_failures_surface() {
    let (backend, storage) = storage("");
    let cancel = CancellationToken::new();

    backend.fail_next(Operation::Put, 503);
    let err = storage.store("k", Bytes::from("v"), &cancel).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.is_retryable());

    backend.fail_next(Operation::Get, 403);
    let err = storage.load("k", &cancel).await.unwrap_err();
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn test_cancelled_operations() {
    let (backend, storage) = storage("");
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(storage.store("k", Bytes::from("v"), &cancel).await.unwrap_err().is_cancelled());
    assert!(storage.load("k", &cancel).await.unwrap_err().is_cancelled());
    assert!(storage.list("", true, &cancel).await.unwrap_err().is_cancelled());
    assert!(!storage.exists("k", &cancel).await);
    assert!(backend.is_empty());
}
