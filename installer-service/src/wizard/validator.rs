// Per-step field validation
//
// Pure and idempotent: the same submission always yields the same accepted map and the same
// ordered error list.

use super::steps::{FieldFormat, FieldSpec, Requirement, StepDefinition};
use crate::models::requests::FieldMap;
use crate::utils::validation;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Non-empty values of the step's own fields, normalized.
    pub accepted: BTreeMap<String, String>,
    /// Messages in field declaration order.
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(definition: &StepDefinition, fields: &FieldMap) -> ValidationResult {
        let mut result = ValidationResult::default();
        let value_of = |spec: &FieldSpec| -> String {
            fields
                .get(spec.name)
                .map(|raw| spec.normalize(raw).to_string())
                .unwrap_or_default()
        };

        for spec in &definition.fields {
            let value = value_of(spec);

            let required = match spec.requirement {
                Requirement::Optional => false,
                Requirement::Required => true,
                Requirement::RequiredWhen(trigger) => definition
                    .field(trigger)
                    .map(|t| !value_of(t).is_empty())
                    .unwrap_or(false),
            };

            if value.is_empty() {
                if required {
                    result.errors.push(format!("{} is required", spec.label));
                }
                continue;
            }

            if let Some(message) = check_format(spec, &value) {
                result.errors.push(message);
                continue;
            }
            result.accepted.insert(spec.name.to_string(), value);
        }
        result
    }
}

fn check_format(spec: &FieldSpec, value: &str) -> Option<String> {
    match spec.format {
        FieldFormat::Free => None,
        FieldFormat::Email => (!validation::is_valid_email(value))
            .then(|| format!("{} must be a valid email address", spec.label)),
        FieldFormat::MinLength(min) => (value.chars().count() < min)
            .then(|| format!("{} must be at least {} characters", spec.label, min)),
        FieldFormat::Port => validation::parse_port(value)
            .is_none()
            .then(|| format!("{} must be a number between 1 and 65535", spec.label)),
        FieldFormat::HttpUrl => (!validation::is_http_url(value))
            .then(|| format!("{} must be an absolute http:// or https:// URL", spec.label)),
        FieldFormat::OneOf(allowed) => (!allowed.contains(&value))
            .then(|| format!("{} must be one of: {}", spec.label, allowed.join(", "))),
        FieldFormat::DatabaseName => validation::validate_database_name(value).err(),
    }
}
