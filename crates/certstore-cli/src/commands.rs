//! Command execution against a storage handle

use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use certstore_core::{Error, Result};
use certstore_storage::{cancel_after, CancellationToken, CertStorage};
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::cli::Command;

/// Run one command
///
/// `shutdown` is cancelled on interrupt; `lock` holds its lock until then.
pub async fn execute(
    storage: &dyn CertStorage,
    command: Command,
    shutdown: &CancellationToken,
    out: &mut (dyn Write + Send),
) -> Result<()> {
    match command {
        Command::Put { key, file } => {
            let data = match file {
                Some(path) => tokio::fs::read(&path).await?,
                None => {
                    let mut buf = Vec::new();
                    tokio::io::stdin().read_to_end(&mut buf).await?;
                    buf
                }
            };
            let size = data.len();
            storage.store(&key, Bytes::from(data), shutdown).await?;
            writeln!(out, "stored {} ({} bytes)", key, size)?;
        }
        Command::Get { key, output } => {
            let data = storage.load(&key, shutdown).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &data).await?,
                None => out.write_all(&data)?,
            }
        }
        Command::Exists { key } => {
            let exists = storage.exists(&key, shutdown).await;
            writeln!(out, "{}", exists)?;
        }
        Command::Rm { key } => {
            storage.delete(&key, shutdown).await?;
            writeln!(out, "deleted {}", key)?;
        }
        Command::Ls { prefix, recursive } => {
            for key in storage.list(&prefix, recursive, shutdown).await? {
                writeln!(out, "{}", key)?;
            }
        }
        Command::Stat { key } => {
            let info = storage.stat(&key, shutdown).await?;
            writeln!(out, "key:      {}", info.key)?;
            writeln!(out, "size:     {}", info.size)?;
            writeln!(out, "modified: {}", info.modified.to_rfc3339())?;
            writeln!(out, "terminal: {}", info.is_terminal)?;
        }
        Command::Lock { key, timeout } => {
            let deadline =
                timeout.map(|secs| cancel_after(shutdown, Duration::from_secs(secs)));
            let wait = deadline.as_deref().unwrap_or(shutdown);

            storage.lock(&key, wait).await.map_err(|e| match e {
                Error::Cancelled { .. } if !shutdown.is_cancelled() => Error::cancelled(format!(
                    "lock {} (timed out after {}s)",
                    key,
                    timeout.unwrap_or_default()
                )),
                other => other,
            })?;
            drop(deadline);
            writeln!(out, "locked {}; interrupt to release", key)?;
            out.flush()?;

            shutdown.cancelled().await;
            info!(%key, "Releasing lock on shutdown");
            storage.unlock(&key, &CancellationToken::new()).await?;
            writeln!(out, "unlocked {}", key)?;
        }
        Command::Unlock { key } => {
            storage.unlock(&key, shutdown).await?;
            writeln!(out, "unlocked {}", key)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use certstore_core::LockConfig;
    use certstore_storage::{MemoryBackend, ObjectStorage};

    use super::*;

    fn storage() -> ObjectStorage {
        let lock = LockConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        ObjectStorage::new(Arc::new(MemoryBackend::new("cli")), "caddy", lock).unwrap()
    }

    async fn run(storage: &ObjectStorage, command: Command) -> Result<String> {
        let mut out = Vec::new();
        execute(storage, command, &CancellationToken::new(), &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_put_get_from_files() {
        let storage = storage();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("example.com.crt");
        let output = dir.path().join("copy.crt");
        std::fs::write(&input, b"-----BEGIN CERTIFICATE-----").unwrap();

        let printed = run(
            &storage,
            Command::Put {
                key: "certificates/example.com.crt".to_string(),
                file: Some(input),
            },
        )
        .await
        .unwrap();
        assert_eq!(printed, "stored certificates/example.com.crt (27 bytes)\n");

        let printed = run(
            &storage,
            Command::Get {
                key: "certificates/example.com.crt".to_string(),
                output: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(printed, "-----BEGIN CERTIFICATE-----");

        run(
            &storage,
            Command::Get {
                key: "certificates/example.com.crt".to_string(),
                output: Some(output.clone()),
            },
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"-----BEGIN CERTIFICATE-----");
    }

    #[tokio::test]
    async fn test_ls_exists_stat_rm() {
        let storage = storage();
        let cancel = CancellationToken::new();
        storage.store("a/x", Bytes::from("1"), &cancel).await.unwrap();
        storage.store("a/y/z", Bytes::from("22"), &cancel).await.unwrap();

        let listed = run(
            &storage,
            Command::Ls {
                prefix: "a/".to_string(),
                recursive: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(listed, "a/x\na/y/\n");

        let exists = run(&storage, Command::Exists { key: "a/x".to_string() }).await.unwrap();
        assert_eq!(exists, "true\n");

        let stat = run(&storage, Command::Stat { key: "a/y/z".to_string() }).await.unwrap();
        assert!(stat.contains("size:     2"));

        run(&storage, Command::Rm { key: "a/x".to_string() }).await.unwrap();
        let exists = run(&storage, Command::Exists { key: "a/x".to_string() }).await.unwrap();
        assert_eq!(exists, "false\n");
    }

    #[tokio::test]
    async fn test_get_missing_key_fails() {
        let storage = storage();
        let err = run(&storage, Command::Get { key: "missing".to_string(), output: None })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_lock_held_until_shutdown() {
        let storage = storage();
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();

        let holder = {
            let storage = storage.clone();
            tokio::spawn(async move {
                let mut out = Vec::new();
                execute(
                    &storage,
                    Command::Lock { key: "k".to_string(), timeout: None },
                    &shutdown,
                    &mut out,
                )
                .await
                .map(|_| String::from_utf8(out).unwrap())
            })
        };

        let cancel = CancellationToken::new();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !storage.exists("k.lock", &cancel).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        trigger.cancel();
        let printed = holder.await.unwrap().unwrap();
        assert!(printed.starts_with("locked k"));
        assert!(printed.ends_with("unlocked k\n"));
        assert!(!storage.exists("k.lock", &cancel).await);
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let storage = storage();
        let cancel = CancellationToken::new();
        storage.lock("k", &cancel).await.unwrap();

        let err = run(&storage, Command::Lock { key: "k".to_string(), timeout: Some(0) })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("timed out"));
    }
}
