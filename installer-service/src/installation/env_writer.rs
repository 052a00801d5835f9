// Application configuration output for the Finalize step
//
// Writes, in order:
//   backend/.env   CodeIgniter settings (template: backend/.env.example when the bundle has one)
//   .env           frontend build settings
//   config.js      runtime frontend settings
//   .installed     lock file with the completion timestamp; written last
//
// Every file goes through the atomic writer. Generated secrets are never logged.

use super::files::write_file_atomic;
use super::INSTALL_LOCK;
use crate::collaborators::{ConfigWriter, FinalizeSettings};
use crate::error::CollaboratorError;
use crate::security::crypto::random_hex;
use async_trait::async_trait;
use log::info;
use regex::Regex;
use std::path::PathBuf;

const BACKEND_ENV: &str = "backend/.env";
const BACKEND_ENV_TEMPLATE: &str = "backend/.env.example";
const FRONTEND_ENV: &str = ".env";
const FRONTEND_CONFIG: &str = "config.js";

/// Quote a value for a dotenv file unless it is plainly safe.
pub fn env_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_.:/@-".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Set `key = value` in dotenv text: replaces an existing (possibly commented-out) assignment,
/// otherwise appends one.
pub fn set_env_value(content: &str, key: &str, value: &str) -> String {
    let line = format!("{} = {}", key, value);
    let pattern = format!(r"(?m)^[ \t]*#?[ \t]*{}[ \t]*=.*$", regex::escape(key));
    match Regex::new(&pattern) {
        Ok(re) if re.is_match(content) => re.replace(content, regex::NoExpand(&line)).to_string(),
        _ => {
            let mut out = content.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&line);
            out.push('\n');
            out
        }
    }
}

/// All backend settings the installer owns, in file order.
fn backend_values(
    settings: &FinalizeSettings,
    encryption_key: &str,
    jwt_secret: &str,
) -> Vec<(&'static str, String)> {
    let production = settings.environment == "production";
    let db = &settings.database;
    vec![
        ("CI_ENVIRONMENT", settings.environment.clone()),
        ("app.baseURL", format!("'{}/'", settings.api_url.trim_end_matches('/'))),
        (
            "app.forceGlobalSecureRequests",
            if production { "true" } else { "false" }.to_string(),
        ),
        ("database.default.hostname", env_quote(&db.host)),
        ("database.default.database", env_quote(&db.name)),
        ("database.default.username", env_quote(&db.user)),
        ("database.default.password", env_quote(&db.password)),
        ("database.default.DBDriver", "MySQLi".to_string()),
        ("database.default.DBPrefix", String::new()),
        ("database.default.port", db.port.to_string()),
        ("database.default.charset", "utf8mb4".to_string()),
        ("database.default.DBCollat", "utf8mb4_unicode_ci".to_string()),
        ("encryption.key", format!("hex2bin('{}')", encryption_key)),
        ("JWT_SECRET", format!("'{}'", jwt_secret)),
        (
            "logger.threshold",
            if production { "3" } else { "4" }.to_string(),
        ),
    ]
}

/// Render `backend/.env` from an optional template.
pub fn render_backend_env(
    template: Option<&str>,
    settings: &FinalizeSettings,
    encryption_key: &str,
    jwt_secret: &str,
) -> String {
    let mut content = template
        .map(str::to_string)
        .unwrap_or_else(|| "# Generated by the installer\n".to_string());
    for (key, value) in backend_values(settings, encryption_key, jwt_secret) {
        content = set_env_value(&content, key, &value);
    }
    content
}

pub fn render_frontend_env(settings: &FinalizeSettings) -> String {
    format!("VITE_API_BASE_URL={}\n", settings.api_url)
}

pub fn render_frontend_config(settings: &FinalizeSettings) -> String {
    let url = settings.api_url.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "// Generated by the installer\nwindow.APP_CONFIG = {{\n  API_BASE_URL: '{}'\n}};\n",
        url
    )
}

pub struct EnvFileWriter {
    install_root: PathBuf,
}

impl EnvFileWriter {
    pub fn new(install_root: PathBuf) -> Self {
        Self { install_root }
    }

    async fn write_file(&self, relative: &str, content: &str) -> Result<(), CollaboratorError> {
        let path = self.install_root.join(relative);
        write_file_atomic(&path, content.as_bytes(), relative)
            .await
            .map_err(|e| {
                CollaboratorError::new(
                    format!("Could not write {}. Check permissions.", relative),
                    format!("{:?}: {:#}", path, e),
                )
            })
    }

    async fn read_template(&self) -> Option<String> {
        tokio::fs::read_to_string(self.install_root.join(BACKEND_ENV_TEMPLATE))
            .await
            .ok()
    }
}

#[async_trait]
impl ConfigWriter for EnvFileWriter {
    async fn write(&self, settings: &FinalizeSettings) -> Result<(), CollaboratorError> {
        let secrets = random_hex(32).and_then(|key| Ok((key, random_hex(64)?)));
        let (encryption_key, jwt_secret) = secrets.map_err(|e| {
            CollaboratorError::new("Could not generate application secrets.", format!("{:#}", e))
        })?;

        let template = self.read_template().await;
        let backend = render_backend_env(
            template.as_deref(),
            settings,
            &encryption_key,
            &jwt_secret,
        );
        self.write_file(BACKEND_ENV, &backend).await?;
        self.write_file(FRONTEND_ENV, &render_frontend_env(settings)).await?;
        self.write_file(FRONTEND_CONFIG, &render_frontend_config(settings)).await?;

        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.write_file(INSTALL_LOCK, &format!("{}\n", stamp)).await?;

        info!(
            "[PHASE: finalize] [STEP: config] Configuration written (root={:?}, template={}, environment={})",
            self.install_root,
            template.is_some(),
            settings.environment
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::DatabaseSettings;

    fn finalize(environment: &str) -> FinalizeSettings {
        FinalizeSettings {
            app_url: "https://example.org".to_string(),
            api_url: "https://example.org/api".to_string(),
            environment: environment.to_string(),
            database: DatabaseSettings {
                host: "localhost".to_string(),
                port: 3307,
                name: "app".to_string(),
                user: "app_user".to_string(),
                password: "p@ss word".to_string(),
                import_seed: false,
            },
        }
    }

    #[test]
    fn set_env_value_replaces_commented_and_appends_missing() {
        let template = "# CI_ENVIRONMENT = development\napp.baseURL = 'http://localhost:8080/'\n";
        let out = set_env_value(template, "CI_ENVIRONMENT", "production");
        assert!(out.starts_with("CI_ENVIRONMENT = production\n"), "{}", out);

        let out = set_env_value(&out, "JWT_SECRET", "'x'");
        assert!(out.ends_with("JWT_SECRET = 'x'\n"), "{}", out);
        assert_eq!(out.matches("app.baseURL").count(), 1);
    }

    #[test]
    fn set_env_value_treats_dots_literally() {
        let out = set_env_value("appXbaseURL = keep\n", "app.baseURL", "'u'");
        assert!(out.contains("appXbaseURL = keep"), "{}", out);
        assert!(out.contains("app.baseURL = 'u'"), "{}", out);
    }

    #[test]
    fn env_quote_leaves_simple_values_and_quotes_the_rest() {
        assert_eq!(env_quote("localhost"), "localhost");
        assert_eq!(env_quote("p@ss word"), "\"p@ss word\"");
        assert_eq!(env_quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(env_quote(""), "\"\"");
    }

    #[test]
    fn backend_env_carries_database_and_environment_settings() {
        let out = render_backend_env(None, &finalize("development"), "ab", "cd");
        assert!(out.contains("CI_ENVIRONMENT = development"));
        assert!(out.contains("app.baseURL = 'https://example.org/api/'"));
        assert!(out.contains("app.forceGlobalSecureRequests = false"));
        assert!(out.contains("database.default.port = 3307"));
        assert!(out.contains("database.default.password = \"p@ss word\""));
        assert!(out.contains("encryption.key = hex2bin('ab')"));
        assert!(out.contains("JWT_SECRET = 'cd'"));
        assert!(out.contains("logger.threshold = 4"));
    }

    #[tokio::test]
    async fn writer_uses_template_and_writes_lock_last() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("backend")).unwrap();
        std::fs::write(
            dir.path().join("backend/.env.example"),
            "# keep me\ndatabase.default.hostname = localhost\nencryption.key =\n",
        )
        .unwrap();

        EnvFileWriter::new(dir.path().to_path_buf())
            .write(&finalize("production"))
            .await
            .unwrap();

        let backend = std::fs::read_to_string(dir.path().join("backend/.env")).unwrap();
        assert!(backend.starts_with("# keep me\n"), "{}", backend);
        assert_eq!(backend.matches("encryption.key").count(), 1);
        let jwt = backend
            .lines()
            .find(|l| l.starts_with("JWT_SECRET"))
            .unwrap();
        assert_eq!(jwt.len(), "JWT_SECRET = ''".len() + 128, "{}", jwt);
        assert!(backend.contains("logger.threshold = 3"));

        let frontend = std::fs::read_to_string(dir.path().join(".env")).unwrap();
        assert_eq!(frontend, "VITE_API_BASE_URL=https://example.org/api\n");
        let config = std::fs::read_to_string(dir.path().join("config.js")).unwrap();
        assert!(config.contains("API_BASE_URL: 'https://example.org/api'"));
        assert!(crate::installation::install_locked(dir.path()));
    }
}
