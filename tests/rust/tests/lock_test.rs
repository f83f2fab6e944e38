use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use bytes::Bytes;
use certstore_core::LockConfig;
use certstore_storage::{
    cancel_after, CancellationToken, CertStorage, MemoryBackend, ObjectStorage, Operation,
};

const POLL: Duration = Duration::from_millis(20);

fn storage(conditional_writes: bool) -> (MemoryBackend, ObjectStorage) {
    let backend = MemoryBackend::new("locks");
    let lock = LockConfig {
        poll_interval: POLL,
        conditional_writes,
        ..Default::default()
    };
    let storage =
        ObjectStorage::new(Arc::new(backend.clone()), "caddy", lock).expect("valid lock config");
    (backend, storage)
}

#[tokio::test]
async fn test_second_caller_waits_for_unlock() -> Result<()> {
    let (backend, storage) = storage(true);
    let cancel = CancellationToken::new();

    storage.lock("issue_cert_example.com", &cancel).await?;
    assert!(backend.paths().contains(&"caddy/issue_cert_example.com.lock".to_string()));

    let waiter = {
        let storage = storage.clone();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            storage.lock("issue_cert_example.com", &cancel).await?;
            Ok::<_, certstore_core::Error>(Instant::now())
        })
    };

    tokio::time::sleep(POLL * 5).await;
    assert!(!waiter.is_finished());

    let released = Instant::now();
    storage.unlock("issue_cert_example.com", &cancel).await?;

    let acquired = tokio::time::timeout(Duration::from_secs(2), waiter).await???;
    assert!(acquired.duration_since(released) < POLL * 10);
    Ok(())
}

#[tokio::test]
async fn test_precancelled_lock_sends_nothing() {
    let (backend, storage) = storage(true);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = storage.lock("k", &cancel).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(backend.request_count(Operation::Head), 0);
    assert_eq!(backend.request_count(Operation::Put), 0);
    assert!(backend.is_empty());
}

#[tokio::test]
async fn test_lock_wait_times_out() -> Result<()> {
    let (_, storage) = storage(true);
    let cancel = CancellationToken::new();
    storage.lock("k", &cancel).await?;

    let deadline = cancel_after(&cancel, POLL * 3);
    let err = storage.lock("k", &deadline).await.unwrap_err();
    assert!(err.is_cancelled());

    // The original holder is untouched
    assert!(storage.exists("k.lock", &cancel).await);
    Ok(())
}

#[tokio::test]
async fn test_unlock_without_lock_is_ok() -> Result<()> {
    let (_, storage) = storage(true);
    let cancel = CancellationToken::new();

    storage.unlock("never-locked", &cancel).await?;
    storage.lock("k", &cancel).await?;
    storage.unlock("k", &cancel).await?;
    storage.unlock("k", &cancel).await?;
    Ok(())
}

#[tokio::test]
async fn test_lock_marker_is_an_ordinary_key() -> Result<()> {
    let (_, storage) = storage(true);
    let cancel = CancellationToken::new();

    storage.store("certificates/example.com.crt", Bytes::from("pem"), &cancel).await?;
    storage.lock("certificates/example.com.crt", &cancel).await?;

    let mut keys = storage.list("certificates/", false, &cancel).await?;
    keys.sort();
    assert_eq!(keys, vec!["certificates/example.com.crt", "certificates/example.com.crt.lock"]);

    storage.unlock("certificates/example.com.crt", &cancel).await?;
    assert_eq!(
        storage.list("certificates/", false, &cancel).await?,
        vec!["certificates/example.com.crt"]
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lockers_are_exclusive() -> Result<()> {
    let (_, storage) = storage(true);
    let holders = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let storage = storage.clone();
        let holders = holders.clone();
        let completed = completed.clone();
        tasks.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            storage
                .with_lock("renew_example.com", &cancel, || async {
                    assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0, "two holders at once");
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    holders.fetch_sub(1, Ordering::SeqCst);
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        }));
    }

    for task in tasks {
        tokio::time::timeout(Duration::from_secs(10), task).await???;
    }
    assert_eq!(completed.load(Ordering::SeqCst), 8);
    assert!(!storage.exists("renew_example.com.lock", &CancellationToken::new()).await);
    Ok(())
}

#[tokio::test]
async fn test_write_then_verify_lock_round_trip() -> Result<()> {
    let (backend, storage) = storage(false);
    let cancel = CancellationToken::new();

    storage.lock("k", &cancel).await?;
    assert_eq!(backend.request_count(Operation::Get), 1);

    let deadline = cancel_after(&cancel, POLL * 3);
    assert!(storage.lock("k", &deadline).await.unwrap_err().is_cancelled());

    storage.unlock("k", &cancel).await?;
    storage.lock("k", &cancel).await?;
    Ok(())
}
