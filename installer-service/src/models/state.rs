// Installer progress record
//
// This is the single record the installer persists between requests. Everything else a request
// needs (extraction status, capability limits) is re-derived from the host on every call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wizard steps, in the only order the installer walks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Welcome,
    Requirements,
    Extraction,
    DatabaseConfig,
    AdminConfig,
    Finalize,
    Complete,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::Welcome,
        Step::Requirements,
        Step::Extraction,
        Step::DatabaseConfig,
        Step::AdminConfig,
        Step::Finalize,
        Step::Complete,
    ];

    /// URL path segment for this step.
    pub fn slug(&self) -> &'static str {
        match self {
            Step::Welcome => "welcome",
            Step::Requirements => "requirements",
            Step::Extraction => "extraction",
            Step::DatabaseConfig => "database-config",
            Step::AdminConfig => "admin-config",
            Step::Finalize => "finalize",
            Step::Complete => "complete",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Step> {
        let slug = slug.trim().to_ascii_lowercase();
        Step::ALL.into_iter().find(|s| s.slug() == slug)
    }

    /// The step that follows a successful submission. `Complete` is terminal.
    pub fn next(&self) -> Step {
        match self {
            Step::Welcome => Step::Requirements,
            Step::Requirements => Step::Extraction,
            Step::Extraction => Step::DatabaseConfig,
            Step::DatabaseConfig => Step::AdminConfig,
            Step::AdminConfig => Step::Finalize,
            Step::Finalize => Step::Complete,
            Step::Complete => Step::Complete,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Step::Welcome => "Welcome",
            Step::Requirements => "System Requirements",
            Step::Extraction => "Application Files",
            Step::DatabaseConfig => "Database",
            Step::AdminConfig => "Administrator Account",
            Step::Finalize => "Finalize",
            Step::Complete => "Complete",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Persisted installer progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationState {
    pub current_step: Step,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    /// Last observed layout check. Never trusted on its own; refreshed from disk per request.
    #[serde(default)]
    pub extracted: bool,
    /// Messages for the step being redisplayed. Request-scoped, never written to disk.
    #[serde(skip)]
    pub errors: Vec<String>,
}

impl Default for InstallationState {
    fn default() -> Self {
        Self {
            current_step: Step::Welcome,
            config: BTreeMap::new(),
            extracted: false,
            errors: Vec::new(),
        }
    }
}

impl InstallationState {
    pub fn is_complete(&self) -> bool {
        self.current_step == Step::Complete
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Merge accepted values; existing keys are overwritten, never removed.
    pub fn merge_config<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in values {
            self.config.insert(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_walk_forward_and_stop_at_complete() {
        let mut step = Step::Welcome;
        let mut seen = vec![step];
        while step != Step::Complete {
            step = step.next();
            seen.push(step);
        }
        assert_eq!(seen, Step::ALL.to_vec());
        assert_eq!(Step::Complete.next(), Step::Complete);
    }

    #[test]
    fn slugs_round_trip_and_ignore_case() {
        for step in Step::ALL {
            assert_eq!(Step::from_slug(step.slug()), Some(step));
        }
        assert_eq!(Step::from_slug("Database-Config"), Some(Step::DatabaseConfig));
        assert_eq!(Step::from_slug("uninstall"), None);
    }

    #[test]
    fn errors_are_not_serialized() {
        let mut state = InstallationState::default();
        state.errors.push("transient".to_string());
        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("transient"), "errors leaked into {}", json);

        let back: InstallationState = serde_json::from_str(&json).unwrap();
        assert!(back.errors.is_empty());
        assert_eq!(back.current_step, Step::Welcome);
    }

    #[test]
    fn merge_config_keeps_existing_keys() {
        let mut state = InstallationState::default();
        state.merge_config([("dbHost".to_string(), "localhost".to_string())]);
        state.merge_config([("adminUsername".to_string(), "bob".to_string())]);
        assert_eq!(state.config_value("dbHost"), Some("localhost"));
        assert_eq!(state.config_value("adminUsername"), Some("bob"));
        assert_eq!(state.config.len(), 2);
    }
}
