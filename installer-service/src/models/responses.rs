// API response models

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::state::Step;
use crate::installation::capabilities::CapabilityReport;
use crate::wizard::steps::FieldKind;

// =========================
// Generic wrapper
// =========================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            message: None,
        }
    }

    /// Failure that still carries a payload (e.g. the step to redisplay).
    pub fn fail_with(data: T, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(message.into()),
            message: None,
        }
    }
}

// =========================
// Requirements
// =========================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementCheck {
    pub name: String,
    pub status: String, // Pass | Warn | Fail
    pub detail: String,
}

impl RequirementCheck {
    pub fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_status(name, "Pass", detail)
    }

    pub fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_status(name, "Warn", detail)
    }

    pub fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::with_status(name, "Fail", detail)
    }

    fn with_status(name: impl Into<String>, status: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: status.to_string(),
            detail: detail.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == "Fail"
    }
}

/// Pass | Warn | Fail, whichever is worst.
pub fn overall_status(checks: &[RequirementCheck]) -> &'static str {
    if checks.iter().any(|c| c.status == "Fail") {
        "Fail"
    } else if checks.iter().any(|c| c.status == "Warn") {
        "Warn"
    } else {
        "Pass"
    }
}

// =========================
// Steps
// =========================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldView {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// Everything a front end needs to render one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub step: Step,
    pub title: String,
    pub fields: Vec<FieldView>,
    /// Previously accepted values for this step's fields. Secrets are never echoed back.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub notices: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<RequirementCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilityReport>,
    pub extracted: bool,
    /// Absent once the installation is complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseTestResponse {
    pub success: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_status_is_worst_case() {
        let mut checks = vec![RequirementCheck::pass("a", "ok")];
        assert_eq!(overall_status(&checks), "Pass");
        checks.push(RequirementCheck::warn("b", "meh"));
        assert_eq!(overall_status(&checks), "Warn");
        checks.push(RequirementCheck::fail("c", "no"));
        assert_eq!(overall_status(&checks), "Fail");
    }

    #[test]
    fn api_response_omits_empty_members() {
        let json = serde_json::to_value(ApiResponse::<u8>::fail("nope")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "nope");
        assert!(json.get("data").is_none());
    }
}
