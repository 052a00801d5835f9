// Shared fixtures for HTTP handler tests

use super::{AppContext, SESSION_COOKIE};
use crate::collaborators::{
    AdminAccount, AdminProvisioner, ConfigWriter, DatabaseGateway, DatabaseSettings,
    FinalizeSettings, ProvisionOutcome,
};
use crate::error::CollaboratorError;
use crate::installation::capabilities::{CapabilityProbe, CapabilityReport};
use crate::persistence::FileStateStore;
use crate::security::csrf::{AntiForgery, SessionTokenStore};
use crate::settings::InstallerSettings;
use crate::wizard::runtime::{Collaborators, Installer};
use crate::wizard::steps::StepCatalog;
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub struct StaticProbe {
    pub archive: bool,
    pub max_upload_bytes: u64,
}

#[async_trait]
impl CapabilityProbe for StaticProbe {
    async fn probe(&self) -> CapabilityReport {
        CapabilityReport {
            archive_support_available: self.archive,
            max_upload_bytes: self.max_upload_bytes,
            free_disk_bytes: Some(u64::MAX),
            capabilities: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct CountingCollaborator {
    pub calls: AtomicU32,
}

#[async_trait]
impl DatabaseGateway for CountingCollaborator {
    async fn test_connection(&self, _db: &DatabaseSettings) -> Result<(), CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn apply(&self, _db: &DatabaseSettings) -> Result<(), CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl AdminProvisioner for CountingCollaborator {
    async fn provision(
        &self,
        _db: &DatabaseSettings,
        _admin: &AdminAccount,
    ) -> Result<ProvisionOutcome, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProvisionOutcome::Created)
    }
}

#[async_trait]
impl ConfigWriter for CountingCollaborator {
    async fn write(&self, _settings: &FinalizeSettings) -> Result<(), CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestApp {
    pub dir: tempfile::TempDir,
    pub ctx: AppContext,
    pub session: String,
    pub token: String,
    pub database: Arc<CountingCollaborator>,
}

impl TestApp {
    pub fn new(archive: bool, max_upload_bytes: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = InstallerSettings::default();
        settings.paths.install_root = dir.path().to_path_buf();
        settings.requirements.min_free_bytes = 0;
        let settings = Arc::new(settings);

        let catalog = StepCatalog::new(&settings.validation);
        let store = Arc::new(FileStateStore::new(
            settings.state_file(),
            catalog.secret_fields(),
        ));
        let forgery = Arc::new(SessionTokenStore::new());
        let session = uuid::Uuid::new_v4().to_string();
        let token = forgery.issue(&session).unwrap();
        let database = Arc::new(CountingCollaborator::default());
        let others = Arc::new(CountingCollaborator::default());

        let installer = Installer::new(
            settings,
            store,
            Arc::new(StaticProbe {
                archive,
                max_upload_bytes,
            }),
            Collaborators {
                database: database.clone(),
                admin: others.clone(),
                config_writer: others,
            },
            forgery,
        );
        Self {
            dir,
            ctx: AppContext {
                installer: Arc::new(installer),
            },
            session,
            token,
            database,
        }
    }

    /// Headers carrying this app's session cookie.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, self.session)).unwrap(),
        );
        headers
    }
}

pub fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Zip bundle with the default expected layout.
pub fn bundle_bytes() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    zip.start_file("backend/index.php", options).unwrap();
    zip.write_all(b"<?php echo 'ok';").unwrap();
    zip.start_file("database/schema.sql", options).unwrap();
    zip.write_all(b"CREATE TABLE t (id INT);").unwrap();
    zip.finish().unwrap().into_inner()
}

pub fn extracted(root: &Path) -> bool {
    root.join("backend/index.php").is_file() && root.join("database/schema.sql").is_file()
}
