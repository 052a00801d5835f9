//! Disk utilities (detection only; nothing here modifies volumes).

use anyhow::Result;
use log::{debug, info};
use std::path::Path;
use std::time::Instant;

/// Best-effort free-space check for the filesystem holding `path` (bytes).
///
/// - Linux: `df -Pk <path>`, "Available" column.
/// - Other platforms: unsupported; callers treat the limit as unknown.
pub async fn get_free_space_bytes_for_path(path: &Path) -> Result<u64> {
    let started = Instant::now();
    debug!(
        "[PHASE: probe] [STEP: free_space] get_free_space_bytes_for_path entered (path={:?})",
        path
    );

    let bytes = free_space_bytes(path).await?;

    info!(
        "[PHASE: probe] [STEP: free_space] get_free_space_bytes_for_path exit (bytes={}, duration_ms={})",
        bytes,
        started.elapsed().as_millis()
    );
    Ok(bytes)
}

#[cfg(target_os = "linux")]
async fn free_space_bytes(path: &Path) -> Result<u64> {
    use tokio::time::Duration;

    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid path"))?
        .to_string();

    let out = crate::installation::run_cmd_with_timeout(
        "df",
        &["-Pk".to_string(), path_str],
        Duration::from_secs(10),
        "get_free_space_linux_df",
    )
    .await?;

    if out.exit_code != Some(0) {
        anyhow::bail!("Failed to query free space (exit_code={:?})", out.exit_code);
    }
    parse_df_available_bytes(&out.stdout)
}

#[cfg(not(target_os = "linux"))]
async fn free_space_bytes(_path: &Path) -> Result<u64> {
    anyhow::bail!("Free space detection not available on this OS")
}

/// Parse `df -Pk` output:
///
/// ```text
/// Filesystem 1024-blocks Used Available Capacity Mounted on
/// /dev/sda1  102400      2048 100352    2%       /
/// ```
pub fn parse_df_available_bytes(stdout: &str) -> Result<u64> {
    let mut lines = stdout.lines();
    let _header = lines.next();
    let data = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("df output missing data row"))?;
    let cols: Vec<&str> = data.split_whitespace().collect();
    if cols.len() < 4 {
        anyhow::bail!("df output parse error");
    }
    let avail_kb: u64 = cols[3]
        .parse()
        .map_err(|_| anyhow::anyhow!("Unable to parse df available KB '{}'", cols[3]))?;
    Ok(avail_kb.saturating_mul(1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_available_column() {
        let out = "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/sda1 102400 2048 100352 2% /\n";
        assert_eq!(parse_df_available_bytes(out).unwrap(), 100352 * 1024);
    }

    #[test]
    fn rejects_truncated_output() {
        assert!(parse_df_available_bytes("Filesystem 1024-blocks Used Available\n").is_err());
        assert!(parse_df_available_bytes("header\n/dev/sda1 1 2\n").is_err());
    }
}
