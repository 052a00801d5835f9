// Host-side installation work
//
// Capability probing, requirement checks, configuration file output, durable file helpers and
// a shared runner for external commands with timeouts/retries.
//
// IMPORTANT:
// - Never log secrets (database passwords, generated keys, tokens).
// - All I/O should be async.

pub mod capabilities;
pub mod env_writer;
pub mod files;
pub mod requirements;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u128,
}

/// Lock file written last by a successful Finalize.
pub const INSTALL_LOCK: &str = ".installed";

/// True when a previous run finished installing into `root`.
pub fn install_locked(root: &Path) -> bool {
    root.join(INSTALL_LOCK).is_file()
}

/// True when every expected top-level directory exists under `root`.
///
/// An empty layout never counts as extracted.
pub fn layout_present(root: &Path, expected: &[String]) -> bool {
    !expected.is_empty() && expected.iter().all(|dir| root.join(dir).is_dir())
}

fn mask_arg_for_log(arg: &str) -> String {
    let lower = arg.to_ascii_lowercase();
    if lower.contains("password") || lower.contains("pwd=") || lower.contains("secret") {
        return "***".to_string();
    }
    if arg.len() > 64 {
        return crate::utils::logging::mask_sensitive(arg);
    }
    arg.to_string()
}

fn is_transient_exec_error(e: &anyhow::Error) -> bool {
    let msg = e.to_string().to_ascii_lowercase();
    msg.contains("temporarily")
        || msg.contains("resource busy")
        || msg.contains("interrupted")
        || msg.contains("text file busy")
}

async fn run_cmd_once(
    program: &str,
    args: &[String],
    timeout_dur: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    let started = Instant::now();
    debug!(
        "[PHASE: installation] [STEP: cmd] spawning (operation={}, program={}, args=[{}])",
        operation,
        program,
        args.iter().map(|a| mask_arg_for_log(a)).collect::<Vec<_>>().join(", ")
    );

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn '{}' (operation={})", program, operation))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("Failed to capture stdout (operation={})", operation))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("Failed to capture stderr (operation={})", operation))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).await?;
        Ok::<String, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr.read_to_end(&mut buf).await?;
        Ok::<String, std::io::Error>(String::from_utf8_lossy(&buf).to_string())
    });

    let status = match timeout(timeout_dur, child.wait()).await {
        Ok(status) => status.with_context(|| {
            format!("Command wait failed (operation={}, program={})", operation, program)
        })?,
        Err(_) => {
            warn!(
                "[PHASE: installation] [STEP: cmd] Timeout reached; killing process (operation={}, program={}, timeout_ms={})",
                operation,
                program,
                timeout_dur.as_millis()
            );
            let _ = child.kill().await;
            let _ = timeout(Duration::from_secs(5), child.wait()).await;
            anyhow::bail!(
                "Command timed out after {}ms (operation={}, program={})",
                timeout_dur.as_millis(),
                operation,
                program
            );
        }
    };

    let stdout = stdout_task
        .await
        .context("stdout join failed")?
        .context("stdout read failed")?;
    let stderr = stderr_task
        .await
        .context("stderr join failed")?
        .context("stderr read failed")?;

    Ok(CommandOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        duration_ms: started.elapsed().as_millis(),
    })
}

/// Run an external command with a timeout and up to 3 retries for transient spawn failures.
///
/// Returns captured stdout/stderr even when the exit code is non-zero (caller decides success).
/// Timeouts are not retried.
pub async fn run_cmd_with_timeout(
    program: &str,
    args: &[String],
    timeout_dur: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    let started = Instant::now();
    let strategy = ExponentialBackoff::from_millis(200)
        .factor(2)
        .max_delay(Duration::from_secs(2))
        .take(3)
        .map(jitter);

    let result = RetryIf::start(
        strategy,
        || run_cmd_once(program, args, timeout_dur, operation),
        |e: &anyhow::Error| {
            let transient = is_transient_exec_error(e);
            if transient {
                warn!(
                    "[PHASE: installation] [STEP: cmd] Transient command failure; retrying (operation={}, err={})",
                    operation, e
                );
            }
            transient
        },
    )
    .await;

    match &result {
        Ok(out) => info!(
            "[PHASE: installation] [STEP: cmd] {} finished (program={}, exit_code={:?}, duration_ms={})",
            operation,
            program,
            out.exit_code,
            started.elapsed().as_millis()
        ),
        Err(e) => error!(
            "[PHASE: installation] [STEP: cmd] {} failed (program={}, duration_ms={}, err={:#})",
            operation,
            program,
            started.elapsed().as_millis(),
            e
        ),
    }
    result
}
