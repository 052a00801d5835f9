//! Installation state persistence.
//!
//! The state file is JSON, replaced atomically (temp file + fsync + rename) on every save, so a
//! crash leaves either the old or the new record. Secret fields are encrypted at rest and come
//! back as plaintext from `load()`.

use crate::installation::files::write_file_atomic;
use crate::models::state::InstallationState;
use crate::security::secret_protector::{default_key_path, SecretProtector};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const FORMAT_VERSION: u32 = 1;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current state; a fresh `Welcome` state when nothing was saved yet.
    async fn load(&self) -> Result<InstallationState>;

    /// Durably replace the stored state before returning.
    async fn save(&self, state: &InstallationState) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateFile {
    format_version: u32,
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    state: InstallationState,
}

pub struct FileStateStore {
    path: PathBuf,
    secret_fields: Vec<String>,
    protector: SecretProtector,
    io_lock: Mutex<()>,
}

impl FileStateStore {
    /// `secret_fields` are encrypted on save and decrypted on load.
    pub fn new(path: PathBuf, secret_fields: Vec<String>) -> Self {
        let protector = SecretProtector::new(default_key_path(&path));
        Self {
            path,
            secret_fields,
            protector,
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<InstallationState> {
        let _guard = self.io_lock.lock().await;

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "[PHASE: state] [STEP: load] No state file yet; starting at welcome (path={:?})",
                    self.path
                );
                return Ok(InstallationState::default());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("Failed to read state file {:?}", self.path))
            }
        };

        let file: StateFile = serde_json::from_slice(&bytes)
            .with_context(|| format!("State file {:?} is not valid", self.path))?;
        if file.format_version > FORMAT_VERSION {
            anyhow::bail!(
                "State file {:?} was written by a newer installer (format {})",
                self.path,
                file.format_version
            );
        }

        let mut state = file.state;
        self.protector
            .open_fields(&mut state.config, &self.secret_fields)
            .await?;
        Ok(state)
    }

    async fn save(&self, state: &InstallationState) -> Result<()> {
        let _guard = self.io_lock.lock().await;

        let mut stored = state.clone();
        stored.errors.clear();
        self.protector
            .seal_fields(&mut stored.config, &self.secret_fields)
            .await?;

        let file = StateFile {
            format_version: FORMAT_VERSION,
            saved_at: Utc::now(),
            state: stored,
        };
        let bytes = serde_json::to_vec_pretty(&file).context("Failed to serialize state")?;
        write_file_atomic(&self.path, &bytes, "state_file").await?;

        info!(
            "[PHASE: state] [STEP: save] Saved (current_step={}, config_keys={}, extracted={})",
            state.current_step,
            state.config.len(),
            state.extracted
        );
        Ok(())
    }
}
