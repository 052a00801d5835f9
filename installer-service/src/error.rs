//! Error taxonomy shared by the wizard, its collaborators and the HTTP layer.

use crate::models::state::Step;
use thiserror::Error;

/// Failure reported by an external collaborator (database, account store, config writer).
///
/// `message` is shown to the operator verbatim; `internal_details` only goes to the log.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CollaboratorError {
    pub message: String,
    pub internal_details: String,
}

impl CollaboratorError {
    pub fn new(message: impl Into<String>, internal_details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            internal_details: internal_details.into(),
        }
    }
}

/// Everything a step request can fail with.
#[derive(Debug, Error)]
pub enum InstallError {
    /// Operator-correctable field problems, in declaration order.
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),

    /// The host lacks a feature the step needs; the operator has to act by hand.
    #[error("{message}")]
    Capability {
        message: String,
        manual_action: String,
    },

    /// Bundle could not be read or written; partial output may remain on disk.
    #[error("{message}")]
    Archive { message: String },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// The state record could not be read or written. Nothing was committed.
    #[error("installer state is unavailable: {0}")]
    Persistence(String),

    #[error("anti-forgery token is missing or invalid")]
    Forgery,

    #[error("installation is already complete")]
    AlreadyComplete,

    #[error("step '{submitted}' cannot be submitted while the installer is at '{expected}'")]
    StepMismatch { expected: Step, submitted: Step },

    /// The application tree is already in place; a new bundle would never be extracted.
    #[error("the application is already extracted; the uploaded bundle was discarded")]
    AlreadyExtracted,

    /// Bundle upload rejected; the staged file has been removed.
    #[error("{0}")]
    Upload(String),

    #[error("the bundle exceeds the upload limit of {limit} bytes")]
    PayloadTooLarge { limit: u64 },
}

impl InstallError {
    pub fn persistence(err: anyhow::Error) -> Self {
        InstallError::Persistence(format!("{:#}", err))
    }

    /// Messages to show alongside the redisplayed step.
    pub fn messages(&self) -> Vec<String> {
        match self {
            InstallError::Validation(errors) => errors.clone(),
            InstallError::Capability {
                message,
                manual_action,
            } => vec![message.clone(), manual_action.clone()],
            other => vec![other.to_string()],
        }
    }

    /// True when the current step is simply shown again with the error list.
    pub fn is_redisplay(&self) -> bool {
        matches!(
            self,
            InstallError::Validation(_) | InstallError::Collaborator(_) | InstallError::Archive { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_keep_order() {
        let err = InstallError::Validation(vec![
            "database host is required".to_string(),
            "database name is required".to_string(),
        ]);
        assert_eq!(
            err.messages(),
            vec!["database host is required", "database name is required"]
        );
        assert!(err.is_redisplay());
    }

    #[test]
    fn capability_error_carries_manual_action() {
        let err = InstallError::Capability {
            message: "Archive support is not available".to_string(),
            manual_action: "Extract the bundle manually".to_string(),
        };
        assert_eq!(err.messages().len(), 2);
        assert!(!err.is_redisplay());
    }

    #[test]
    fn collaborator_error_displays_user_message_only() {
        let err: InstallError =
            CollaboratorError::new("Unable to connect", "tcp reset by 10.0.0.3").into();
        assert_eq!(err.to_string(), "Unable to connect");
        assert!(err.is_redisplay());
    }
}
