//! File helpers for the installer.
//!
//! - Async I/O only (tokio)
//! - Retry transient errors (file locks, AV scanners, busy mounts)
//! - Timeout every operation
//! - Durable writes: temp file + fsync + rename, so a crash never leaves a torn file

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

const FILE_OP_TIMEOUT: Duration = Duration::from_secs(60);

pub fn is_transient_fs_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_ascii_lowercase();
    msg.contains("used by another process")
        || msg.contains("in use")
        || msg.contains("resource busy")
        || msg.contains("temporarily")
        || msg.contains("interrupted")
        || msg.contains("timed out")
}

fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(50)
        .factor(2)
        .max_delay(Duration::from_millis(750))
        .take(3)
        .map(jitter)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()))
}

async fn write_atomic_once(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create parent dir failed: {:?}", parent))?;
    }

    let tmp = temp_sibling(path);
    let write = async {
        let mut f = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("create temp file failed: {:?}", tmp))?;
        f.write_all(bytes).await?;
        f.flush().await?;
        f.sync_all().await.context("fsync failed")?;
        drop(f);
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("rename {:?} -> {:?} failed", tmp, path))?;
        Ok::<(), anyhow::Error>(())
    };

    match timeout(FILE_OP_TIMEOUT, write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Err(_) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            anyhow::bail!("write timed out after {}s", FILE_OP_TIMEOUT.as_secs());
        }
    }

    // Persist the rename itself. Directories cannot be fsynced on every platform.
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = tokio::fs::File::open(parent).await {
            let _ = dir.sync_all().await;
        }
    }
    Ok(())
}

/// Durably replace `path` with `bytes`, retrying transient failures.
pub async fn write_file_atomic(path: &Path, bytes: &[u8], label: &str) -> Result<()> {
    let started = Instant::now();
    let result = RetryIf::start(
        retry_strategy(),
        || write_atomic_once(path, bytes),
        |e: &anyhow::Error| {
            let transient = is_transient_fs_error(e);
            warn!(
                "[PHASE: files] [STEP: write] {} attempt failed (path={:?}, transient={}, error={:#})",
                label, path, transient, e
            );
            transient
        },
    )
    .await;

    match &result {
        Ok(()) => debug!(
            "[PHASE: files] [STEP: write] {} ok (path={:?}, bytes={}, duration_ms={})",
            label,
            path,
            bytes.len(),
            started.elapsed().as_millis()
        ),
        Err(e) => warn!(
            "[PHASE: files] [STEP: write] {} failed permanently (path={:?}, error={:#})",
            label, path, e
        ),
    }
    result
}

/// Move `from` onto `to` (same filesystem), retrying transient failures.
pub async fn rename_with_retries(from: &Path, to: &Path, label: &str) -> Result<()> {
    RetryIf::start(
        retry_strategy(),
        || async {
            timeout(Duration::from_secs(10), tokio::fs::rename(from, to))
                .await
                .map_err(|_| anyhow::anyhow!("rename timed out"))?
                .with_context(|| format!("rename {:?} -> {:?} failed", from, to))
        },
        |e: &anyhow::Error| {
            warn!(
                "[PHASE: files] [STEP: rename] {} attempt failed (error={:#})",
                label, e
            );
            is_transient_fs_error(e)
        },
    )
    .await
}

/// Remove a file; a file that is already gone counts as removed.
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context(format!("remove failed: {:?}", path))),
    }
}

/// Write-probe a directory: create and delete a marker file.
pub async fn probe_writable(dir: &Path) -> bool {
    let marker = dir.join(format!(".installer_write_test_{}.tmp", uuid::Uuid::new_v4().simple()));
    let ok = matches!(
        timeout(Duration::from_secs(5), tokio::fs::write(&marker, b"ok")).await,
        Ok(Ok(()))
    );
    let _ = tokio::fs::remove_file(&marker).await;
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_replaces_content_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("state.json");

        write_file_atomic(&target, b"first", "test").await.unwrap();
        write_file_atomic(&target, b"second", "test").await.unwrap();

        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
    }

    #[tokio::test]
    async fn rename_moves_file_and_gives_up_on_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("bundle.zip.part");
        let to = dir.path().join("bundle.zip");
        std::fs::write(&from, b"zip").unwrap();

        rename_with_retries(&from, &to, "test").await.unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"zip");

        let err = rename_with_retries(&from, &to, "test").await.unwrap_err();
        assert!(format!("{:#}", err).contains("rename"), "{:#}", err);
    }

    #[tokio::test]
    async fn remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        remove_file_if_exists(&dir.path().join("absent")).await.unwrap();
    }

    #[tokio::test]
    async fn probe_writable_detects_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(probe_writable(dir.path()).await);
        assert!(!probe_writable(&dir.path().join("missing")).await);
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient_fs_error(&anyhow::anyhow!("Resource busy")));
        assert!(!is_transient_fs_error(&anyhow::anyhow!("No such file or directory")));
    }
}
