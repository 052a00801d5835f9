// Request models for the step surface

use serde::Deserialize;
use std::collections::HashMap;

/// Submitted form values keyed by field name.
pub type FieldMap = HashMap<String, String>;

pub const CSRF_FIELD: &str = "csrf_token";

/// A form-encoded step POST, split into the anti-forgery token and the step's own fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, String>")]
pub struct StepSubmission {
    pub csrf_token: String,
    pub fields: FieldMap,
}

impl From<HashMap<String, String>> for StepSubmission {
    fn from(mut form: HashMap<String, String>) -> Self {
        let csrf_token = form.remove(CSRF_FIELD).unwrap_or_default();
        Self {
            csrf_token,
            fields: form,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_split_from_fields() {
        let mut form = HashMap::new();
        form.insert("csrf_token".to_string(), "abc".to_string());
        form.insert("dbHost".to_string(), "localhost".to_string());

        let submission = StepSubmission::from(form);
        assert_eq!(submission.csrf_token, "abc");
        assert_eq!(submission.fields.len(), 1);
        assert!(!submission.fields.contains_key("csrf_token"));
    }

    #[test]
    fn missing_token_is_empty() {
        let submission = StepSubmission::from(HashMap::new());
        assert!(submission.csrf_token.is_empty());
    }
}
