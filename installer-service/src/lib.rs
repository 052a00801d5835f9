// Self-hosted bundle installer
// Main library entry point

pub mod api;
pub mod archiver;
pub mod collaborators;
pub mod database;
pub mod error;
pub mod installation;
pub mod models;
pub mod persistence;
pub mod security;
pub mod settings;
pub mod utils;
pub mod wizard;

use anyhow::{Context, Result};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::AppContext;
use crate::database::{MySqlAdminProvisioner, MySqlGateway};
use crate::installation::capabilities::{CapabilityProbe, HostCapabilityProbe};
use crate::installation::env_writer::EnvFileWriter;
use crate::persistence::FileStateStore;
use crate::security::csrf::SessionTokenStore;
use crate::settings::InstallerSettings;
use crate::wizard::runtime::{Collaborators, Installer};
use crate::wizard::steps::StepCatalog;

pub const USAGE: &str = "Usage: installer-service [--config <path>] [--print-default-config] [--capabilities]";

/// Command-line switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub config: Option<PathBuf>,
    pub print_default_config: bool,
    pub capabilities: bool,
    pub help: bool,
}

impl CliOptions {
    /// Parse arguments after the program name.
    pub fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let mut options = CliOptions::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let path = iter
                        .next()
                        .filter(|p| !p.starts_with("--"))
                        .ok_or_else(|| "--config requires a path".to_string())?;
                    options.config = Some(PathBuf::from(path));
                }
                other if other.starts_with("--config=") => {
                    let path = &other["--config=".len()..];
                    if path.is_empty() {
                        return Err("--config requires a path".to_string());
                    }
                    options.config = Some(PathBuf::from(path));
                }
                "--print-default-config" => options.print_default_config = true,
                "--capabilities" => options.capabilities = true,
                "-h" | "--help" => options.help = true,
                other => return Err(format!("Unknown argument: {}", other)),
            }
        }
        Ok(options)
    }
}

/// Initialize logging with dual format (JSON + human-readable) under `log_dir`.
pub fn init_logging(log_dir: &Path, with_stdout: bool) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", log_dir))?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%d-%H%M%S");
    let json_log_file = log_dir.join(format!("installer-{}.log", timestamp));
    let txt_log_file = log_dir.join(format!("installer-{}.txt", timestamp));

    let mut dispatch = fern::Dispatch::new()
        .level(log::LevelFilter::Debug)
        // sqlx statement logging would echo imported SQL.
        .level_for("sqlx", log::LevelFilter::Warn);

    if with_stdout {
        dispatch = dispatch.chain(
            fern::Dispatch::new()
                .level(log::LevelFilter::Info)
                .format(move |out, message, record| {
                    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned) = utils::logging::parse_log_metadata(&message_str);
                    out.finish(format_args!(
                        "{}",
                        utils::logging::format_human_readable_log(
                            &now.to_string(),
                            record.level(),
                            record.target(),
                            &cleaned,
                            phase.as_deref(),
                            step.as_deref(),
                        )
                    ));
                })
                .chain(std::io::stdout()),
        );
    }

    dispatch = dispatch
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let now = chrono::Utc::now().to_rfc3339();
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned) = utils::logging::parse_log_metadata(&message_str);
                    out.finish(format_args!(
                        "{}\n",
                        utils::logging::format_json_log(
                            &now,
                            record.level(),
                            record.target(),
                            &cleaned,
                            phase.as_deref(),
                            step.as_deref(),
                        )
                    ));
                })
                .chain(fern::log_file(&json_log_file)?),
        )
        .chain(
            fern::Dispatch::new()
                .format(move |out, message, record| {
                    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
                    let message_str = format!("{}", message);
                    let (phase, step, cleaned) = utils::logging::parse_log_metadata(&message_str);
                    out.finish(format_args!(
                        "{}\n",
                        utils::logging::format_human_readable_log(
                            &now.to_string(),
                            record.level(),
                            record.target(),
                            &cleaned,
                            phase.as_deref(),
                            step.as_deref(),
                        )
                    ));
                })
                .chain(fern::log_file(&txt_log_file)?),
        );

    dispatch
        .apply()
        .context("A logger is already installed")?;

    info!(
        "[PHASE: initialization] Logging initialized, log directory: {:?}",
        log_dir
    );
    Ok(())
}

/// Pin the install root to an absolute path so later working-directory changes cannot move it.
pub fn prepare_settings(mut settings: InstallerSettings) -> Result<InstallerSettings> {
    settings.paths.install_root = utils::path_resolver::resolve_install_root(&settings)?;
    Ok(settings)
}

/// Wire the production collaborators.
pub fn build_installer(settings: Arc<InstallerSettings>) -> Installer {
    let catalog = StepCatalog::new(&settings.validation);
    let root = settings.install_root().to_path_buf();
    let store = Arc::new(FileStateStore::new(
        settings.state_file(),
        catalog.secret_fields(),
    ));
    let probe = Arc::new(HostCapabilityProbe::new(Arc::clone(&settings)));
    let collaborators = Collaborators {
        database: Arc::new(MySqlGateway::new(root.clone())),
        admin: Arc::new(MySqlAdminProvisioner::new()),
        config_writer: Arc::new(EnvFileWriter::new(root)),
    };
    Installer::new(
        settings,
        store,
        probe,
        collaborators,
        Arc::new(SessionTokenStore::new()),
    )
}

/// Probe report as pretty JSON.
pub async fn capabilities_json(settings: Arc<InstallerSettings>) -> Result<String> {
    let report = HostCapabilityProbe::new(settings).probe().await;
    serde_json::to_string_pretty(&report).context("Failed to render capability report")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("[PHASE: shutdown] Ctrl-C received; stopping"),
        Err(e) => log::error!("[PHASE: shutdown] Signal handler unavailable: {}", e),
    }
}

/// Serve the installer until Ctrl-C.
pub async fn run_server(settings: InstallerSettings) -> Result<()> {
    let settings = Arc::new(settings);
    info!(
        "[PHASE: initialization] Installer starting (root={:?}, state={:?}, bundle={:?})",
        settings.install_root(),
        settings.state_file(),
        settings.bundle_path()
    );

    let installer = Arc::new(build_installer(Arc::clone(&settings)));
    let app = api::router(AppContext { installer });

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.bind))?;
    info!(
        "[PHASE: initialization] Listening on http://{}",
        settings.server.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Installer server error")?;

    info!("[PHASE: shutdown] Installer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn cli_parses_all_switches() {
        let options =
            CliOptions::parse(&args(&["--config", "site.toml", "--capabilities"])).unwrap();
        assert_eq!(options.config, Some(PathBuf::from("site.toml")));
        assert!(options.capabilities);
        assert!(!options.print_default_config);

        let options = CliOptions::parse(&args(&["--config=x.toml", "--print-default-config"]))
            .unwrap();
        assert_eq!(options.config, Some(PathBuf::from("x.toml")));
        assert!(options.print_default_config);
    }

    #[test]
    fn cli_rejects_unknown_and_incomplete_arguments() {
        assert!(CliOptions::parse(&args(&["--config"])).is_err());
        assert!(CliOptions::parse(&args(&["--config", "--capabilities"])).is_err());
        assert!(CliOptions::parse(&args(&["--gui"])).is_err());
    }

    #[test]
    fn init_logging_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        // Another test may have installed the global logger already.
        if init_logging(dir.path(), false).is_ok() {
            log::info!("[PHASE: test] [STEP: logging] hello");
            log::logger().flush();
            let names: Vec<String> = std::fs::read_dir(dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
                .collect();
            assert!(names.iter().any(|n| n.ends_with(".log")), "files={:?}", names);
            assert!(names.iter().any(|n| n.ends_with(".txt")), "files={:?}", names);
        }
    }

    #[tokio::test]
    async fn prepared_settings_make_install_root_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = InstallerSettings::default();
        settings.paths.install_root = dir.path().to_path_buf();
        let settings = prepare_settings(settings).unwrap();
        assert!(settings.install_root().is_absolute());

        let json = capabilities_json(Arc::new(settings)).await.unwrap();
        assert!(json.contains("archiveSupportAvailable"), "json={}", json);
    }
}
