// Installer settings
//
// Layering (later wins): built-in defaults -> optional TOML file -> INSTALLER__SECTION__KEY env vars.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Extraction may never be given less than this.
pub const MIN_EXTRACTION_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_CONFIG_FILE: &str = "installer.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    pub server: ServerSettings,
    pub paths: PathSettings,
    pub bundle: BundleSettings,
    pub upload: UploadSettings,
    pub capabilities: CapabilitySettings,
    pub requirements: RequirementSettings,
    pub validation: ValidationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    /// Largest request body the HTTP layer accepts, uploads included.
    pub max_request_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Destination root the bundle is extracted into.
    pub install_root: PathBuf,
    /// Relative paths resolve against `install_root`.
    pub state_file: PathBuf,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSettings {
    /// Well-known bundle name at the install root (upload target and auto-detect source).
    pub file_name: String,
    /// Top-level directories whose presence means "already extracted".
    pub expected_layout: Vec<String>,
    pub extraction_timeout_secs: u64,
    /// Ceiling on total uncompressed bytes written by one extraction.
    pub max_extracted_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub max_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitySettings {
    /// Operators can switch archive handling off to force manual extraction.
    pub archive_support: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementSettings {
    /// Directories (relative to the install root) that must be writable.
    pub writable_dirs: Vec<String>,
    pub min_free_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub min_password_length: usize,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            paths: PathSettings::default(),
            bundle: BundleSettings::default(),
            upload: UploadSettings::default(),
            capabilities: CapabilitySettings::default(),
            requirements: RequirementSettings::default(),
            validation: ValidationSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            max_request_bytes: 512 * 1024 * 1024,
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            install_root: PathBuf::from("."),
            state_file: PathBuf::from(".installer/state.json"),
            log_dir: None,
        }
    }
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            file_name: "app-deployment.zip".to_string(),
            expected_layout: vec!["backend".to_string(), "database".to_string()],
            extraction_timeout_secs: MIN_EXTRACTION_TIMEOUT_SECS,
            max_extracted_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        Self {
            archive_support: true,
        }
    }
}

impl Default for RequirementSettings {
    fn default() -> Self {
        Self {
            writable_dirs: vec![".".to_string()],
            min_free_bytes: 500 * 1024 * 1024,
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            min_password_length: 8,
        }
    }
}

impl InstallerSettings {
    /// Load settings from an optional file plus environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let file = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let raw = config::Config::builder()
            .add_source(config::File::from(file.as_path()).required(config_file.is_some()))
            .add_source(
                config::Environment::with_prefix("INSTALLER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bundle.expected_layout")
                    .with_list_parse_key("requirements.writable_dirs")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read installer settings from {:?}", file))?;

        let settings: InstallerSettings = raw
            .try_deserialize()
            .context("Installer settings are invalid")?;
        Ok(settings.normalized())
    }

    /// Clamp values the installer refuses to run below.
    pub fn normalized(mut self) -> Self {
        if self.bundle.extraction_timeout_secs < MIN_EXTRACTION_TIMEOUT_SECS {
            self.bundle.extraction_timeout_secs = MIN_EXTRACTION_TIMEOUT_SECS;
        }
        if self.validation.min_password_length == 0 {
            self.validation.min_password_length = 1;
        }
        self.bundle.expected_layout.retain(|d| !d.trim().is_empty());
        self
    }

    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&InstallerSettings::default())
            .context("Failed to render default settings")
    }

    pub fn install_root(&self) -> &Path {
        &self.paths.install_root
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.paths.install_root.join(&self.bundle.file_name)
    }

    /// Where an in-flight upload is streamed before it replaces the bundle.
    pub fn staged_upload_path(&self) -> PathBuf {
        self.paths
            .install_root
            .join(format!("{}.part", self.bundle.file_name))
    }

    pub fn state_file(&self) -> PathBuf {
        if self.paths.state_file.is_absolute() {
            self.paths.state_file.clone()
        } else {
            self.paths.install_root.join(&self.paths.state_file)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_clamps_extraction_timeout() {
        let mut s = InstallerSettings::default();
        s.bundle.extraction_timeout_secs = 30;
        let s = s.normalized();
        assert_eq!(s.bundle.extraction_timeout_secs, MIN_EXTRACTION_TIMEOUT_SECS);
    }

    #[test]
    fn default_toml_parses_back() {
        let rendered = InstallerSettings::default_toml().unwrap();
        let parsed: InstallerSettings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.bundle.file_name, "app-deployment.zip");
        assert_eq!(parsed.validation.min_password_length, 8);
    }

    #[test]
    fn load_reads_file_and_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installer.toml");
        std::fs::write(
            &path,
            "[bundle]\nfile_name = \"site.zip\"\nextraction_timeout_secs = 900\n",
        )
        .unwrap();

        let s = InstallerSettings::load(Some(&path)).unwrap();
        assert_eq!(s.bundle.file_name, "site.zip");
        assert_eq!(s.bundle.extraction_timeout_secs, 900);
        assert_eq!(s.bundle.expected_layout, vec!["backend", "database"]);
        assert_eq!(s.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn relative_state_file_resolves_under_install_root() {
        let mut s = InstallerSettings::default();
        s.paths.install_root = PathBuf::from("/srv/app");
        assert_eq!(s.state_file(), PathBuf::from("/srv/app/.installer/state.json"));
        assert_eq!(s.bundle_path(), PathBuf::from("/srv/app/app-deployment.zip"));
        assert_eq!(
            s.staged_upload_path(),
            PathBuf::from("/srv/app/app-deployment.zip.part")
        );
    }
}
