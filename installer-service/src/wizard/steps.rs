// Step catalog
//
// Static descriptors for every wizard step: which fields it collects, how they are validated and
// persisted, and which collaborator action a successful submit triggers. Built once at startup.

use crate::models::responses::FieldView;
use crate::models::state::Step;
use crate::settings::ValidationSettings;
use serde::{Deserialize, Serialize};

pub const ENVIRONMENTS: &[&str] = &["production", "development"];
pub const SEED_FLAG: &[&str] = &["0", "1"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Optional,
    Required,
    /// Required only when the named field of the same step is non-empty.
    RequiredWhen(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormat {
    Free,
    Email,
    MinLength(usize),
    Port,
    HttpUrl,
    OneOf(&'static [&'static str]),
    DatabaseName,
}

/// How an accepted value is kept between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Plain,
    /// Encrypted in the state file.
    Secret,
    /// Used by the step's action and then dropped.
    Transient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Text,
    Password,
    Number,
    Email,
    Url,
    Checkbox,
    Select,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
    pub requirement: Requirement,
    pub format: FieldFormat,
    pub persistence: Persistence,
}

impl FieldSpec {
    fn new(name: &'static str, label: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            label,
            kind,
            requirement: Requirement::Optional,
            format: FieldFormat::Free,
            persistence: Persistence::Plain,
        }
    }

    fn required(mut self) -> Self {
        self.requirement = Requirement::Required;
        self
    }

    fn required_when(mut self, trigger: &'static str) -> Self {
        self.requirement = Requirement::RequiredWhen(trigger);
        self
    }

    fn format(mut self, format: FieldFormat) -> Self {
        self.format = format;
        self
    }

    fn persist(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    /// Plain values are trimmed; secrets are taken byte for byte.
    pub fn normalize<'a>(&self, raw: &'a str) -> &'a str {
        match self.persistence {
            Persistence::Plain => raw.trim(),
            Persistence::Secret | Persistence::Transient => raw,
        }
    }

    pub fn view(&self) -> FieldView {
        let options = match self.format {
            FieldFormat::OneOf(values) if self.kind == FieldKind::Select => {
                values.iter().map(|v| v.to_string()).collect()
            }
            _ => Vec::new(),
        };
        FieldView {
            name: self.name.to_string(),
            label: self.label.to_string(),
            kind: self.kind,
            required: self.requirement == Requirement::Required,
            options,
        }
    }
}

/// What a successful submit of a step does besides advancing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    None,
    CheckRequirements,
    ExtractBundle,
    ApplyDatabase,
    ProvisionAdmin,
    WriteConfiguration,
}

#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub step: Step,
    pub fields: Vec<FieldSpec>,
    pub action: StepAction,
}

impl StepDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct StepCatalog {
    steps: Vec<StepDefinition>,
}

impl StepCatalog {
    pub fn new(validation: &ValidationSettings) -> Self {
        use FieldKind as K;

        let steps = vec![
            StepDefinition {
                step: Step::Welcome,
                fields: Vec::new(),
                action: StepAction::None,
            },
            StepDefinition {
                step: Step::Requirements,
                fields: Vec::new(),
                action: StepAction::CheckRequirements,
            },
            StepDefinition {
                step: Step::Extraction,
                fields: Vec::new(),
                action: StepAction::ExtractBundle,
            },
            StepDefinition {
                step: Step::DatabaseConfig,
                fields: vec![
                    FieldSpec::new("dbHost", "database host", K::Text).required(),
                    FieldSpec::new("dbPort", "database port", K::Number)
                        .required()
                        .format(FieldFormat::Port),
                    FieldSpec::new("dbName", "database name", K::Text)
                        .required()
                        .format(FieldFormat::DatabaseName),
                    FieldSpec::new("dbUser", "database user", K::Text).required(),
                    FieldSpec::new("dbPassword", "database password", K::Password)
                        .persist(Persistence::Secret),
                    FieldSpec::new("importSeed", "seed data", K::Checkbox)
                        .format(FieldFormat::OneOf(SEED_FLAG)),
                ],
                action: StepAction::ApplyDatabase,
            },
            StepDefinition {
                step: Step::AdminConfig,
                fields: vec![
                    FieldSpec::new("adminUsername", "username", K::Text),
                    FieldSpec::new("adminPassword", "password", K::Password)
                        .required_when("adminUsername")
                        .format(FieldFormat::MinLength(validation.min_password_length))
                        .persist(Persistence::Transient),
                    FieldSpec::new("adminEmail", "email", K::Email).format(FieldFormat::Email),
                    FieldSpec::new("adminName", "name", K::Text),
                ],
                action: StepAction::ProvisionAdmin,
            },
            StepDefinition {
                step: Step::Finalize,
                fields: vec![
                    FieldSpec::new("appUrl", "application URL", K::Url)
                        .required()
                        .format(FieldFormat::HttpUrl),
                    FieldSpec::new("apiUrl", "API URL", K::Url).format(FieldFormat::HttpUrl),
                    FieldSpec::new("environment", "environment", K::Select)
                        .format(FieldFormat::OneOf(ENVIRONMENTS)),
                ],
                action: StepAction::WriteConfiguration,
            },
            StepDefinition {
                step: Step::Complete,
                fields: Vec::new(),
                action: StepAction::None,
            },
        ];
        Self { steps }
    }

    pub fn get(&self, step: Step) -> &StepDefinition {
        // Every Step variant is registered in `new`, in declaration order.
        &self.steps[Step::ALL.iter().position(|s| *s == step).unwrap_or(0)]
    }

    fn names_with(&self, persistence: Persistence) -> Vec<String> {
        self.steps
            .iter()
            .flat_map(|d| d.fields.iter())
            .filter(|f| f.persistence == persistence)
            .map(|f| f.name.to_string())
            .collect()
    }

    /// Fields encrypted in the state file.
    pub fn secret_fields(&self) -> Vec<String> {
        self.names_with(Persistence::Secret)
    }

    /// Fields never written to the state file.
    pub fn transient_fields(&self) -> Vec<String> {
        self.names_with(Persistence::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StepCatalog {
        StepCatalog::new(&ValidationSettings::default())
    }

    #[test]
    fn every_step_has_a_definition() {
        let catalog = catalog();
        for step in Step::ALL {
            assert_eq!(catalog.get(step).step, step);
        }
    }

    #[test]
    fn persistence_classes() {
        let catalog = catalog();
        assert_eq!(catalog.secret_fields(), vec!["dbPassword"]);
        assert_eq!(catalog.transient_fields(), vec!["adminPassword"]);
    }

    #[test]
    fn password_length_comes_from_settings() {
        let catalog = StepCatalog::new(&ValidationSettings {
            min_password_length: 12,
        });
        let password = catalog.get(Step::AdminConfig).field("adminPassword").unwrap();
        assert_eq!(password.format, FieldFormat::MinLength(12));
        assert_eq!(password.requirement, Requirement::RequiredWhen("adminUsername"));
    }

    #[test]
    fn select_fields_expose_options() {
        let catalog = catalog();
        let view = catalog.get(Step::Finalize).field("environment").unwrap().view();
        assert_eq!(view.options, vec!["production", "development"]);
        let seed = catalog.get(Step::DatabaseConfig).field("importSeed").unwrap().view();
        assert!(seed.options.is_empty());
    }

    #[test]
    fn secrets_are_not_trimmed() {
        let catalog = catalog();
        let def = catalog.get(Step::DatabaseConfig);
        assert_eq!(def.field("dbHost").unwrap().normalize("  h  "), "h");
        assert_eq!(def.field("dbPassword").unwrap().normalize(" pw "), " pw ");
    }
}
