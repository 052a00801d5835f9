//! Host capability probing.
//!
//! The probe reports what the host can do right now: whether bundles can be unpacked here, how
//! large an upload may be, and which optional libraries were compiled in. It never fails; a
//! limit it cannot determine is left out of the minimum (or reported as 0 when nothing is known).

use crate::settings::InstallerSettings;
use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityCheck {
    pub name: String,
    pub available: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityReport {
    pub archive_support_available: bool,
    /// Smallest of every effective limit; 0 means uploads are not possible.
    pub max_upload_bytes: u64,
    /// Free space at the install root, when the platform can tell.
    pub free_disk_bytes: Option<u64>,
    pub capabilities: Vec<CapabilityCheck>,
}

#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    async fn probe(&self) -> CapabilityReport;
}

/// Probe backed by the running host and the operator's settings.
pub struct HostCapabilityProbe {
    settings: Arc<InstallerSettings>,
}

impl HostCapabilityProbe {
    pub fn new(settings: Arc<InstallerSettings>) -> Self {
        Self { settings }
    }
}

/// Minimum of the known limits. `None` entries are unknown and skipped.
pub fn effective_upload_limit(limits: &[Option<u64>]) -> u64 {
    limits.iter().flatten().copied().min().unwrap_or(0)
}

#[async_trait]
impl CapabilityProbe for HostCapabilityProbe {
    async fn probe(&self) -> CapabilityReport {
        let root = self.settings.install_root();
        let free_disk_bytes = match crate::utils::disk::get_free_space_bytes_for_path(root).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(
                    "[PHASE: probe] [STEP: capabilities] Free space unknown (root={:?}, error={:#})",
                    root, e
                );
                None
            }
        };

        let archive = self.settings.capabilities.archive_support;
        let max_upload_bytes = effective_upload_limit(&[
            Some(self.settings.upload.max_bytes),
            Some(self.settings.server.max_request_bytes),
            free_disk_bytes,
        ]);

        let capabilities = vec![
            CapabilityCheck {
                name: "zip".to_string(),
                available: archive,
                detail: if archive {
                    "Bundles can be extracted on this host".to_string()
                } else {
                    "Archive handling is disabled; bundles must be extracted manually".to_string()
                },
            },
            CapabilityCheck {
                name: "mysql".to_string(),
                available: true,
                detail: "MySQL client driver (sqlx)".to_string(),
            },
            CapabilityCheck {
                name: "tls".to_string(),
                available: true,
                detail: "Native TLS for database connections".to_string(),
            },
            CapabilityCheck {
                name: "bcrypt".to_string(),
                available: true,
                detail: "Password hashing for administrator accounts".to_string(),
            },
        ];

        info!(
            "[PHASE: probe] [STEP: capabilities] archive_support={}, max_upload_bytes={}, free_disk_bytes={:?}",
            archive, max_upload_bytes, free_disk_bytes
        );

        CapabilityReport {
            archive_support_available: archive,
            max_upload_bytes,
            free_disk_bytes,
            capabilities,
        }
    }
}
