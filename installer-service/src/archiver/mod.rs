//! Bundle extraction.
//!
//! Turns the uploaded or pre-staged zip bundle into the application tree under the install root.
//!
//! Rules:
//! - Idempotent: when the expected top-level layout already exists nothing is touched, bundle
//!   present or not.
//! - Entries that would land outside the destination make the whole bundle corrupt.
//! - Extraction runs on a blocking worker under a time budget (checked between chunks) and a
//!   byte budget on uncompressed output. Both surface as `IoFailure` and keep the source.
//! - The source is deleted only after the layout is verified on disk.
//! - Partial output is left in place on failure; the operator re-uploads or extracts manually.

use crate::installation::capabilities::CapabilityProbe;
use crate::installation::{files, layout_present};
use crate::settings::InstallerSettings;
use log::{error, info, warn};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use zip::ZipArchive;

const CHUNK_BYTES: usize = 64 * 1024;

/// One extraction attempt. Never persisted.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub expected_layout: Vec<String>,
    pub max_bytes: u64,
    pub time_budget: Duration,
}

impl ArchiveJob {
    /// The well-known bundle extracted into the install root.
    pub fn from_settings(settings: &InstallerSettings) -> Self {
        Self {
            source: settings.bundle_path(),
            destination: settings.install_root().to_path_buf(),
            expected_layout: settings.bundle.expected_layout.clone(),
            max_bytes: settings.bundle.max_extracted_bytes,
            time_budget: Duration::from_secs(settings.bundle.extraction_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    Success { entries: usize, bytes: u64 },
    AlreadyExtracted,
    CapabilityMissing,
    CorruptArchive { reason: String },
    IoFailure { reason: String },
}

impl ArchiveOutcome {
    /// True when the application tree is in place afterwards.
    pub fn is_extracted(&self) -> bool {
        matches!(
            self,
            ArchiveOutcome::Success { .. } | ArchiveOutcome::AlreadyExtracted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveOutcome::Success { .. } => "success",
            ArchiveOutcome::AlreadyExtracted => "already_extracted",
            ArchiveOutcome::CapabilityMissing => "capability_missing",
            ArchiveOutcome::CorruptArchive { .. } => "corrupt_archive",
            ArchiveOutcome::IoFailure { .. } => "io_failure",
        }
    }
}

enum UnpackError {
    Corrupt(String),
    Io(String),
}

pub struct ArchiveExtractor {
    probe: Arc<dyn CapabilityProbe>,
}

impl ArchiveExtractor {
    pub fn new(probe: Arc<dyn CapabilityProbe>) -> Self {
        Self { probe }
    }

    pub async fn extract(&self, job: &ArchiveJob) -> ArchiveOutcome {
        let started = Instant::now();
        info!(
            "[PHASE: archive] [STEP: extract] extract entered (source={:?}, destination={:?}, max_bytes={}, time_budget_s={})",
            job.source,
            job.destination,
            job.max_bytes,
            job.time_budget.as_secs()
        );

        if layout_present(&job.destination, &job.expected_layout) {
            info!("[PHASE: archive] [STEP: extract] Layout already present; nothing to do");
            return ArchiveOutcome::AlreadyExtracted;
        }

        if !self.probe.probe().await.archive_support_available {
            warn!("[PHASE: archive] [STEP: extract] Archive support unavailable; bundle left untouched");
            return ArchiveOutcome::CapabilityMissing;
        }

        if !job.source.is_file() {
            return ArchiveOutcome::IoFailure {
                reason: format!("bundle not found at {}", job.source.display()),
            };
        }

        let worker_job = job.clone();
        let deadline = Instant::now() + job.time_budget;
        let joined = tokio::task::spawn_blocking(move || unpack(&worker_job, deadline)).await;

        let outcome = match joined {
            Err(e) => ArchiveOutcome::IoFailure {
                reason: format!("extraction worker failed: {}", e),
            },
            Ok(Err(UnpackError::Corrupt(reason))) => ArchiveOutcome::CorruptArchive { reason },
            Ok(Err(UnpackError::Io(reason))) => ArchiveOutcome::IoFailure { reason },
            Ok(Ok((entries, bytes))) => {
                if layout_present(&job.destination, &job.expected_layout) {
                    if let Err(e) = files::remove_file_if_exists(&job.source).await {
                        warn!(
                            "[PHASE: archive] [STEP: cleanup] Bundle extracted but could not be removed (error={:#})",
                            e
                        );
                    }
                    ArchiveOutcome::Success { entries, bytes }
                } else {
                    ArchiveOutcome::CorruptArchive {
                        reason: format!(
                            "bundle does not contain the expected directories ({})",
                            job.expected_layout
                                .iter()
                                .map(|d| format!("{}/", d))
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    }
                }
            }
        };

        match &outcome {
            ArchiveOutcome::Success { entries, bytes } => info!(
                "[PHASE: archive] [STEP: extract] Extraction complete (entries={}, bytes={}, duration_ms={})",
                entries,
                bytes,
                started.elapsed().as_millis()
            ),
            ArchiveOutcome::CorruptArchive { reason } | ArchiveOutcome::IoFailure { reason } => error!(
                "[PHASE: archive] [STEP: extract] Extraction failed (outcome={}, reason={}, duration_ms={})",
                outcome.as_str(),
                reason,
                started.elapsed().as_millis()
            ),
            _ => {}
        }
        outcome
    }
}

fn io_err(context: &str, path: &Path, e: std::io::Error) -> UnpackError {
    UnpackError::Io(format!("{} {}: {}", context, path.display(), e))
}

fn check_deadline(deadline: Instant, job: &ArchiveJob) -> Result<(), UnpackError> {
    if Instant::now() >= deadline {
        return Err(UnpackError::Io(format!(
            "extraction exceeded its time budget of {}s",
            job.time_budget.as_secs()
        )));
    }
    Ok(())
}

fn unpack(job: &ArchiveJob, deadline: Instant) -> Result<(usize, u64), UnpackError> {
    let file = File::open(&job.source).map_err(|e| io_err("cannot open", &job.source, e))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| UnpackError::Corrupt(format!("not a readable zip archive: {}", e)))?;

    let mut written: u64 = 0;
    let mut entries = 0usize;
    let mut buf = vec![0u8; CHUNK_BYTES];

    for index in 0..archive.len() {
        check_deadline(deadline, job)?;

        let mut entry = archive
            .by_index(index)
            .map_err(|e| UnpackError::Corrupt(format!("entry #{} is unreadable: {}", index, e)))?;
        let name = entry.name().to_string();
        let relative = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            UnpackError::Corrupt(format!("entry '{}' escapes the destination", name))
        })?;
        let out_path = job.destination.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| io_err("cannot create", &out_path, e))?;
            entries += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err("cannot create", parent, e))?;
        }
        let mut out = File::create(&out_path).map_err(|e| io_err("cannot write", &out_path, e))?;

        loop {
            let n = entry.read(&mut buf).map_err(|e| {
                UnpackError::Corrupt(format!("entry '{}' is damaged: {}", name, e))
            })?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > job.max_bytes {
                return Err(UnpackError::Io(format!(
                    "uncompressed size exceeds the budget of {} bytes",
                    job.max_bytes
                )));
            }
            out.write_all(&buf[..n])
                .map_err(|e| io_err("cannot write", &out_path, e))?;
            check_deadline(deadline, job)?;
        }
        out.flush().map_err(|e| io_err("cannot write", &out_path, e))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            // Keep the owner able to rewrite files on a re-run.
            let mode = (mode & 0o777) | 0o600;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))
                .map_err(|e| io_err("cannot set permissions on", &out_path, e))?;
        }
        entries += 1;
    }

    Ok((entries, written))
}
