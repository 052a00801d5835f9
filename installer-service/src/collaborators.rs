//! External collaborators invoked by wizard steps.
//!
//! Production code uses the MySQL gateway/provisioner and the `.env` writer; tests use stubs.
//! Every failure is a [`CollaboratorError`] whose `message` is shown to the operator verbatim.

use crate::error::CollaboratorError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Database connection details collected by the DatabaseConfig step.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub import_seed: bool,
}

// Hand-written so the password can never reach a log line through `{:?}`.
impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"***")
            .field("import_seed", &self.import_seed)
            .finish()
    }
}

impl DatabaseSettings {
    /// Rebuild from accumulated configuration. `None` when a required value is missing.
    pub fn from_config(config: &BTreeMap<String, String>) -> Option<Self> {
        let get = |k: &str| config.get(k).map(String::as_str).unwrap_or("");
        let host = get("dbHost").trim();
        let name = get("dbName").trim();
        let user = get("dbUser").trim();
        if host.is_empty() || name.is_empty() || user.is_empty() {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            port: crate::utils::validation::parse_port(get("dbPort"))?,
            name: name.to_string(),
            user: user.to_string(),
            password: get("dbPassword").to_string(),
            import_seed: get("importSeed") == "1",
        })
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub display_name: String,
}

impl fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminAccount")
            .field("username", &self.username)
            .field("password", &"***")
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .finish()
    }
}

/// Values the Finalize step writes into the application's configuration files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeSettings {
    pub app_url: String,
    /// Defaults to `<app_url>/api` when the operator leaves it empty.
    pub api_url: String,
    pub environment: String,
    pub database: DatabaseSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExists,
}

#[async_trait]
pub trait DatabaseGateway: Send + Sync {
    /// Connect with the given settings and do nothing else.
    async fn test_connection(&self, db: &DatabaseSettings) -> Result<(), CollaboratorError>;

    /// Create the database if missing and import the bundled schema (plus seed data on request).
    async fn apply(&self, db: &DatabaseSettings) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait AdminProvisioner: Send + Sync {
    /// Create the administrator; an existing account with the same username is left untouched.
    async fn provision(
        &self,
        db: &DatabaseSettings,
        admin: &AdminAccount,
    ) -> Result<ProvisionOutcome, CollaboratorError>;
}

#[async_trait]
pub trait ConfigWriter: Send + Sync {
    /// Write the application's configuration files and the install lock.
    async fn write(&self, settings: &FinalizeSettings) -> Result<(), CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn database_settings_from_complete_config() {
        let db = DatabaseSettings::from_config(&config(&[
            ("dbHost", "localhost"),
            ("dbPort", "3306"),
            ("dbName", "app"),
            ("dbUser", "root"),
            ("dbPassword", " pw "),
            ("importSeed", "1"),
        ]))
        .unwrap();
        assert_eq!(db.port, 3306);
        assert_eq!(db.password, " pw ");
        assert!(db.import_seed);
    }

    #[test]
    fn database_settings_require_host_name_user_and_port() {
        assert!(DatabaseSettings::from_config(&config(&[("dbHost", "h")])).is_none());
        assert!(DatabaseSettings::from_config(&config(&[
            ("dbHost", "h"),
            ("dbName", "n"),
            ("dbUser", "u"),
            ("dbPort", "0"),
        ]))
        .is_none());
    }

    #[test]
    fn debug_output_masks_passwords() {
        let admin = AdminAccount {
            username: "bob".to_string(),
            password: "hunter2hunter2".to_string(),
            email: None,
            display_name: "bob".to_string(),
        };
        assert!(!format!("{:?}", admin).contains("hunter2"));
    }
}
