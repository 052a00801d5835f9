// Installer orchestrator
//
// Owns the request lifecycle around the pure `decide` function:
//   load state -> probe event (auto-extraction) -> submit event -> effect -> commit -> settle.
// Requests are serialized by a single async gate so only one writer ever touches the state.
// State is committed strictly after the effect succeeded.

use super::steps::{Persistence, StepCatalog};
use super::validator::ConfigValidator;
use super::{decide, DiskFacts, Effect, Transition, WizardEvent};
use crate::archiver::{ArchiveExtractor, ArchiveJob, ArchiveOutcome};
use crate::collaborators::{
    AdminProvisioner, ConfigWriter, DatabaseGateway, DatabaseSettings, ProvisionOutcome,
};
use crate::error::{CollaboratorError, InstallError};
use crate::installation::capabilities::{CapabilityProbe, CapabilityReport};
use crate::installation::requirements::{blocking_failures, check_requirements};
use crate::installation::{files, install_locked, layout_present};
use crate::models::requests::FieldMap;
use crate::models::responses::StepView;
use crate::models::state::{InstallationState, Step};
use crate::persistence::StateStore;
use crate::security::csrf::AntiForgery;
use crate::settings::InstallerSettings;
use crate::utils::logging::mask_field_map;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct Collaborators {
    pub database: Arc<dyn DatabaseGateway>,
    pub admin: Arc<dyn AdminProvisioner>,
    pub config_writer: Arc<dyn ConfigWriter>,
}

/// Result of a step POST: the step to show next plus the error that kept it there, if any.
#[derive(Debug)]
pub struct StepReply {
    pub view: StepView,
    pub error: Option<InstallError>,
}

pub struct Installer {
    settings: Arc<InstallerSettings>,
    catalog: StepCatalog,
    store: Arc<dyn StateStore>,
    probe: Arc<dyn CapabilityProbe>,
    extractor: ArchiveExtractor,
    collaborators: Collaborators,
    forgery: Arc<dyn AntiForgery>,
    gate: Mutex<()>,
}

impl Installer {
    pub fn new(
        settings: Arc<InstallerSettings>,
        store: Arc<dyn StateStore>,
        probe: Arc<dyn CapabilityProbe>,
        collaborators: Collaborators,
        forgery: Arc<dyn AntiForgery>,
    ) -> Self {
        let catalog = StepCatalog::new(&settings.validation);
        let extractor = ArchiveExtractor::new(Arc::clone(&probe));
        Self {
            settings,
            catalog,
            store,
            probe,
            extractor,
            collaborators,
            forgery,
            gate: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &InstallerSettings {
        &self.settings
    }

    pub fn verify_token(&self, session: &str, token: &str) -> bool {
        self.forgery.verify(session, token)
    }

    pub async fn capabilities(&self) -> CapabilityReport {
        self.probe.probe().await
    }

    /// The current step, after the probe event had its chance to extract and auto-advance.
    pub async fn view(&self, session: &str) -> Result<StepView, InstallError> {
        let _gate = self.gate.lock().await;
        let (state, _, _) = self.begin().await?;
        self.render(session, &state).await
    }

    pub async fn submit(
        &self,
        session: &str,
        token: &str,
        step: Step,
        fields: &FieldMap,
    ) -> Result<StepReply, InstallError> {
        let _gate = self.gate.lock().await;
        let token_verified = self.forgery.verify(session, token);
        info!(
            "[PHASE: wizard] [STEP: submit] Submit received (step={}, token_verified={}, fields=[{}])",
            step,
            token_verified,
            mask_field_map(fields)
        );

        let (state, mut attempt, entered_at) = self.begin().await?;

        // The probe event may already have finished extraction for this very submit.
        if token_verified
            && step == Step::Extraction
            && entered_at == Step::Extraction
            && state.current_step != Step::Extraction
        {
            let view = self.render(session, &state).await?;
            return Ok(StepReply { view, error: None });
        }

        let transition = decide(
            &self.catalog,
            &state,
            WizardEvent::Submit {
                step,
                fields,
                token_verified,
            },
        );

        let result = match transition {
            Transition::Stay => Ok(state.clone()),
            Transition::Rejected(rejection) => Err(InstallError::from(rejection)),
            Transition::Redisplay { errors } => Err(InstallError::Validation(errors)),
            Transition::Advance { effect, next } => match self.perform(effect, &mut attempt).await {
                Ok(()) => {
                    let committed = self.commit(*next).await?;
                    info!(
                        "[PHASE: wizard] [STEP: submit] Advanced (from={}, to={})",
                        step, committed.current_step
                    );
                    Ok(self.settle(committed, &mut attempt).await?)
                }
                Err(e) => Err(e),
            },
        };

        match result {
            Ok(next) => {
                let view = self.render(session, &next).await?;
                Ok(StepReply { view, error: None })
            }
            Err(e @ InstallError::Persistence(_)) => Err(e),
            Err(e) => {
                if e.is_redisplay() {
                    info!(
                        "[PHASE: wizard] [STEP: submit] Step redisplayed (step={}, errors={})",
                        step,
                        e.messages().len()
                    );
                } else {
                    warn!(
                        "[PHASE: wizard] [STEP: submit] Submit refused (step={}, current={}, error={})",
                        step, state.current_step, e
                    );
                }
                let mut shown = state;
                shown.errors = e.messages();
                let view = self.render(session, &shown).await?;
                Ok(StepReply {
                    view,
                    error: Some(e),
                })
            }
        }
    }

    /// Move a fully received upload onto the well-known bundle path and run the probe event.
    ///
    /// Returns the extraction outcome when extraction was attempted.
    pub async fn accept_bundle(
        &self,
        session: &str,
        token: &str,
        staged: &Path,
    ) -> Result<Option<ArchiveOutcome>, InstallError> {
        let _gate = self.gate.lock().await;

        if !self.forgery.verify(session, token) {
            return Err(discard_upload(staged, InstallError::Forgery).await);
        }
        let state = match self.store.load().await {
            Ok(state) => state,
            Err(e) => return Err(discard_upload(staged, InstallError::persistence(e)).await),
        };
        if state.is_complete() || install_locked(self.settings.install_root()) {
            return Err(discard_upload(staged, InstallError::AlreadyComplete).await);
        }
        if self.disk_facts().extracted {
            return Err(discard_upload(staged, InstallError::AlreadyExtracted).await);
        }

        let bundle = self.settings.bundle_path();
        if let Err(e) = files::rename_with_retries(staged, &bundle, "bundle_upload").await {
            let err = InstallError::Upload(format!("The bundle could not be stored: {:#}", e));
            return Err(discard_upload(staged, err).await);
        }
        info!("[PHASE: upload] [STEP: store] Bundle stored (path={:?})", bundle);

        let mut attempt = None;
        let mut state = state;
        state.errors.clear();
        self.settle(state, &mut attempt).await?;
        if let Some(outcome) = &attempt {
            archive_result(outcome, &self.settings)?;
        }
        Ok(attempt)
    }

    /// Try the submitted database settings without touching the installer state.
    pub async fn test_database(
        &self,
        session: &str,
        token: &str,
        fields: &FieldMap,
    ) -> Result<String, InstallError> {
        if !self.forgery.verify(session, token) {
            return Err(InstallError::Forgery);
        }
        let state = self.store.load().await.map_err(InstallError::persistence)?;
        if state.is_complete() || install_locked(self.settings.install_root()) {
            return Err(InstallError::AlreadyComplete);
        }

        let validated = ConfigValidator::validate(self.catalog.get(Step::DatabaseConfig), fields);
        if !validated.is_valid() {
            return Err(InstallError::Validation(validated.errors));
        }
        let db = DatabaseSettings::from_config(&validated.accepted).ok_or_else(|| {
            InstallError::Validation(vec!["database settings are incomplete".to_string()])
        })?;

        self.collaborators
            .database
            .test_connection(&db)
            .await
            .map_err(|e| log_collaborator("database_test", e))?;
        Ok(format!("Connected to {}:{} as {}", db.host, db.port, db.user))
    }

    // ---------------------------------------------------------------------
    // Request lifecycle
    // ---------------------------------------------------------------------

    /// Load and settle. Also returns the step the request found before the probe event ran.
    async fn begin(
        &self,
    ) -> Result<(InstallationState, Option<ArchiveOutcome>, Step), InstallError> {
        let mut state = self.store.load().await.map_err(InstallError::persistence)?;
        state.errors.clear();
        let entered_at = state.current_step;
        let mut attempt = None;
        let state = self.settle(state, &mut attempt).await?;
        Ok((state, attempt, entered_at))
    }

    fn disk_facts(&self) -> DiskFacts {
        DiskFacts {
            extracted: layout_present(
                self.settings.install_root(),
                &self.settings.bundle.expected_layout,
            ),
            bundle_present: self.settings.bundle_path().is_file(),
            installed: install_locked(self.settings.install_root()),
        }
    }

    /// Evaluate the probe event. Auto-extraction runs at most once per request.
    async fn settle(
        &self,
        state: InstallationState,
        attempt: &mut Option<ArchiveOutcome>,
    ) -> Result<InstallationState, InstallError> {
        match decide(&self.catalog, &state, WizardEvent::Probe(self.disk_facts())) {
            Transition::Advance {
                effect: Effect::ExtractBundle { .. },
                next,
            } => {
                if attempt.is_some() {
                    return Ok(state);
                }
                info!("[PHASE: wizard] [STEP: probe] Bundle found; extracting automatically");
                let outcome = self
                    .extractor
                    .extract(&ArchiveJob::from_settings(&self.settings))
                    .await;
                *attempt = Some(outcome.clone());

                if outcome.is_extracted() {
                    return self.commit(*next).await;
                }
                let mut state = state;
                state.extracted = false;
                if let Err(e) = archive_result(&outcome, &self.settings) {
                    warn!(
                        "[PHASE: wizard] [STEP: probe] Automatic extraction failed (step={}, outcome={}, error={})",
                        state.current_step,
                        outcome.as_str(),
                        e
                    );
                    state.errors = e.messages();
                }
                Ok(state)
            }
            Transition::Advance { next, .. } => {
                if next.is_complete() && !state.is_complete() {
                    warn!(
                        "[PHASE: wizard] [STEP: probe] Install lock found; treating the installation as complete (was={})",
                        state.current_step
                    );
                }
                self.commit(*next).await
            }
            _ => Ok(state),
        }
    }

    async fn commit(&self, next: InstallationState) -> Result<InstallationState, InstallError> {
        self.store
            .save(&next)
            .await
            .map_err(InstallError::persistence)?;
        Ok(next)
    }

    async fn perform(
        &self,
        effect: Effect,
        attempt: &mut Option<ArchiveOutcome>,
    ) -> Result<(), InstallError> {
        match effect {
            Effect::None => Ok(()),
            Effect::CheckRequirements => {
                let report = self.probe.probe().await;
                let failures = blocking_failures(&check_requirements(&self.settings, &report).await);
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(InstallError::Validation(failures))
                }
            }
            Effect::ExtractBundle { .. } => {
                let outcome = match attempt {
                    Some(previous) => previous.clone(),
                    None => {
                        let outcome = self
                            .extractor
                            .extract(&ArchiveJob::from_settings(&self.settings))
                            .await;
                        *attempt = Some(outcome.clone());
                        outcome
                    }
                };
                archive_result(&outcome, &self.settings)
            }
            Effect::ApplyDatabase(db) => {
                info!(
                    "[PHASE: wizard] [STEP: database] Applying database configuration ({:?})",
                    db
                );
                self.collaborators
                    .database
                    .apply(&db)
                    .await
                    .map_err(|e| log_collaborator("database_apply", e))
            }
            Effect::ProvisionAdmin { database, admin } => {
                match self.collaborators.admin.provision(&database, &admin).await {
                    Ok(ProvisionOutcome::Created) => {
                        info!(
                            "[PHASE: wizard] [STEP: admin] Administrator created (username={})",
                            admin.username
                        );
                        Ok(())
                    }
                    Ok(ProvisionOutcome::AlreadyExists) => {
                        warn!(
                            "[PHASE: wizard] [STEP: admin] Administrator already exists; keeping it (username={})",
                            admin.username
                        );
                        Ok(())
                    }
                    Err(e) => Err(log_collaborator("admin_provision", e)),
                }
            }
            Effect::WriteConfiguration(finalize) => self
                .collaborators
                .config_writer
                .write(&finalize)
                .await
                .map_err(|e| log_collaborator("config_write", e)),
        }
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    async fn render(&self, session: &str, state: &InstallationState) -> Result<StepView, InstallError> {
        let step = state.current_step;
        let definition = self.catalog.get(step);

        let csrf_token = if state.is_complete() {
            None
        } else {
            Some(
                self.forgery
                    .issue(session)
                    .map_err(InstallError::persistence)?,
            )
        };

        let values = definition
            .fields
            .iter()
            .filter(|f| f.persistence == Persistence::Plain)
            .filter_map(|f| {
                state
                    .config_value(f.name)
                    .map(|v| (f.name.to_string(), v.to_string()))
            })
            .collect();

        let mut notices = Vec::new();
        let mut requirements = Vec::new();
        let mut capabilities = None;
        match step {
            Step::Requirements => {
                let report = self.probe.probe().await;
                requirements = check_requirements(&self.settings, &report).await;
                capabilities = Some(report);
            }
            Step::Extraction => {
                let report = self.probe.probe().await;
                notices.push(format!(
                    "Upload the application bundle or copy it to {}; it is extracted automatically.",
                    self.settings.bundle_path().display()
                ));
                if !report.archive_support_available {
                    notices.push(format!(
                        "Automatic extraction is unavailable on this host. Extract the bundle into {} manually, then reload this page.",
                        self.settings.install_root().display()
                    ));
                }
                capabilities = Some(report);
            }
            Step::AdminConfig => notices.push(
                "Leave the username empty to skip creating an administrator account.".to_string(),
            ),
            Step::Complete => notices.push(
                "The installation is complete. Stop the installer and remove it from the server."
                    .to_string(),
            ),
            _ => {}
        }

        Ok(StepView {
            step,
            title: step.title().to_string(),
            fields: definition.fields.iter().map(|f| f.view()).collect(),
            values,
            errors: state.errors.clone(),
            notices,
            requirements,
            capabilities,
            extracted: state.extracted,
            csrf_token,
        })
    }
}

async fn discard_upload(staged: &Path, err: InstallError) -> InstallError {
    if let Err(e) = files::remove_file_if_exists(staged).await {
        warn!(
            "[PHASE: upload] [STEP: discard] Staged upload could not be removed (error={:#})",
            e
        );
    }
    err
}

fn log_collaborator(operation: &str, e: CollaboratorError) -> InstallError {
    error!(
        "[PHASE: wizard] [STEP: {}] Collaborator failed (message={}, details={})",
        operation, e.message, e.internal_details
    );
    InstallError::Collaborator(e)
}

/// Map an extraction outcome to the step result the operator sees.
fn archive_result(outcome: &ArchiveOutcome, settings: &InstallerSettings) -> Result<(), InstallError> {
    match outcome {
        ArchiveOutcome::Success { .. } | ArchiveOutcome::AlreadyExtracted => Ok(()),
        ArchiveOutcome::CapabilityMissing => Err(InstallError::Capability {
            message: "Archive support is not available on this host.".to_string(),
            manual_action: format!(
                "Extract {} into {} manually, then reload this page.",
                settings.bundle.file_name,
                settings.install_root().display()
            ),
        }),
        ArchiveOutcome::CorruptArchive { reason } => Err(InstallError::Archive {
            message: format!(
                "The bundle is not a valid archive ({}). Upload a new bundle or extract it manually.",
                reason
            ),
        }),
        ArchiveOutcome::IoFailure { reason } => Err(InstallError::Archive {
            message: format!(
                "Extraction failed ({}). Retry, or extract the bundle manually.",
                reason
            ),
        }),
    }
}
