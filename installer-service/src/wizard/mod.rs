//! Installer state machine.
//!
//! `decide` is a pure function from the current state and one event to a [`Transition`]. It never
//! touches the disk or a collaborator: the runtime performs the returned [`Effect`] and commits
//! the proposed next state only when the effect succeeded.
//!
//! Submit checks run in a fixed order: anti-forgery token, completed installation, step
//! mismatch, field validation. The first failing check decides the outcome.

pub mod runtime;
pub mod steps;
pub mod validator;

use crate::collaborators::{AdminAccount, DatabaseSettings, FinalizeSettings};
use crate::error::InstallError;
use crate::models::requests::FieldMap;
use crate::models::state::{InstallationState, Step};
use steps::{StepAction, StepCatalog};
use validator::ConfigValidator;

/// What the runtime observed on disk at the top of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskFacts {
    /// Expected layout present under the install root.
    pub extracted: bool,
    /// Well-known bundle present under the install root.
    pub bundle_present: bool,
    /// Install lock left by a finished run.
    pub installed: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum WizardEvent<'a> {
    /// Synthetic event evaluated at the top of every request.
    Probe(DiskFacts),
    Submit {
        step: Step,
        fields: &'a FieldMap,
        token_verified: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    None,
    CheckRequirements,
    ExtractBundle { automatic: bool },
    ApplyDatabase(DatabaseSettings),
    ProvisionAdmin {
        database: DatabaseSettings,
        admin: AdminAccount,
    },
    WriteConfiguration(FinalizeSettings),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Forgery,
    AlreadyComplete,
    StepMismatch { expected: Step, submitted: Step },
}

impl From<Rejection> for InstallError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::Forgery => InstallError::Forgery,
            Rejection::AlreadyComplete => InstallError::AlreadyComplete,
            Rejection::StepMismatch {
                expected,
                submitted,
            } => InstallError::StepMismatch {
                expected,
                submitted,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to do; state unchanged.
    Stay,
    /// Run `effect`; on success `next` becomes the committed state.
    Advance {
        effect: Effect,
        next: Box<InstallationState>,
    },
    /// Show the same step again with these messages.
    Redisplay { errors: Vec<String> },
    Rejected(Rejection),
}

pub fn decide(catalog: &StepCatalog, state: &InstallationState, event: WizardEvent<'_>) -> Transition {
    match event {
        WizardEvent::Probe(facts) => probe(state, facts),
        WizardEvent::Submit {
            step,
            fields,
            token_verified,
        } => submit(catalog, state, step, fields, token_verified),
    }
}

fn probe(state: &InstallationState, facts: DiskFacts) -> Transition {
    if state.is_complete() {
        return Transition::Stay;
    }

    let mut next = state.clone();
    next.errors.clear();

    // A finished install whose state record went missing must never be configured again.
    if facts.installed {
        next.current_step = Step::Complete;
        next.extracted = facts.extracted;
        return Transition::Advance {
            effect: Effect::None,
            next: Box::new(next),
        };
    }

    if !facts.extracted && facts.bundle_present {
        next.extracted = true;
        if next.current_step == Step::Extraction {
            next.current_step = Step::Extraction.next();
        }
        return Transition::Advance {
            effect: Effect::ExtractBundle { automatic: true },
            next: Box::new(next),
        };
    }

    next.extracted = facts.extracted;
    if facts.extracted && next.current_step == Step::Extraction {
        next.current_step = Step::Extraction.next();
    }

    if next.extracted == state.extracted && next.current_step == state.current_step {
        Transition::Stay
    } else {
        Transition::Advance {
            effect: Effect::None,
            next: Box::new(next),
        }
    }
}

fn submit(
    catalog: &StepCatalog,
    state: &InstallationState,
    step: Step,
    fields: &FieldMap,
    token_verified: bool,
) -> Transition {
    if !token_verified {
        return Transition::Rejected(Rejection::Forgery);
    }
    if state.is_complete() {
        return Transition::Rejected(Rejection::AlreadyComplete);
    }
    if step != state.current_step {
        return Transition::Rejected(Rejection::StepMismatch {
            expected: state.current_step,
            submitted: step,
        });
    }

    let definition = catalog.get(step);
    let validated = ConfigValidator::validate(definition, fields);
    if !validated.is_valid() {
        return Transition::Redisplay {
            errors: validated.errors,
        };
    }

    // The action sees this step's values layered over everything accepted before.
    let mut merged = state.config.clone();
    merged.extend(validated.accepted.clone());

    let effect = match definition.action {
        StepAction::None => Effect::None,
        StepAction::CheckRequirements => Effect::CheckRequirements,
        StepAction::ExtractBundle => Effect::ExtractBundle { automatic: false },
        StepAction::ApplyDatabase => match DatabaseSettings::from_config(&merged) {
            Some(db) => Effect::ApplyDatabase(db),
            None => return missing_database(),
        },
        StepAction::ProvisionAdmin => match admin_account(&validated.accepted) {
            None => Effect::None,
            Some(admin) => match DatabaseSettings::from_config(&merged) {
                Some(database) => Effect::ProvisionAdmin { database, admin },
                None => return missing_database(),
            },
        },
        StepAction::WriteConfiguration => match DatabaseSettings::from_config(&merged) {
            Some(database) => Effect::WriteConfiguration(finalize_settings(&merged, database)),
            None => return missing_database(),
        },
    };

    let transient = catalog.transient_fields();
    let mut next = state.clone();
    next.errors.clear();
    next.merge_config(
        validated
            .accepted
            .into_iter()
            .filter(|(k, _)| !transient.contains(k)),
    );
    if step == Step::Extraction {
        next.extracted = true;
    }
    next.current_step = step.next();

    Transition::Advance {
        effect,
        next: Box::new(next),
    }
}

fn missing_database() -> Transition {
    Transition::Redisplay {
        errors: vec![
            "database settings are incomplete; the database step has to be completed first"
                .to_string(),
        ],
    }
}

/// `None` when no username was given: the admin step is then a no-op.
fn admin_account(accepted: &std::collections::BTreeMap<String, String>) -> Option<AdminAccount> {
    let username = accepted.get("adminUsername")?.clone();
    let password = accepted.get("adminPassword")?.clone();
    let display_name = accepted
        .get("adminName")
        .cloned()
        .unwrap_or_else(|| username.clone());
    Some(AdminAccount {
        username,
        password,
        email: accepted.get("adminEmail").cloned(),
        display_name,
    })
}

fn finalize_settings(
    config: &std::collections::BTreeMap<String, String>,
    database: DatabaseSettings,
) -> FinalizeSettings {
    let app_url = config
        .get("appUrl")
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_default();
    let api_url = config
        .get("apiUrl")
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("{}/api", app_url));
    let environment = config
        .get("environment")
        .cloned()
        .unwrap_or_else(|| "production".to_string());
    FinalizeSettings {
        app_url,
        api_url,
        environment,
        database,
    }
}
