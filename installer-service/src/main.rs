use installer_service::settings::InstallerSettings;
use installer_service::utils::path_resolver::resolve_log_folder;
use installer_service::{CliOptions, USAGE};
use std::sync::Arc;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match CliOptions::parse(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    if options.help {
        println!("{}", USAGE);
        return;
    }

    // Non-interactive: render the built-in defaults as a starting installer.toml and exit.
    if options.print_default_config {
        match InstallerSettings::default_toml() {
            Ok(rendered) => print!("{}", rendered),
            Err(e) => {
                eprintln!("{:#}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let settings = match InstallerSettings::load(options.config.as_deref())
        .and_then(installer_service::prepare_settings)
    {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Installer settings could not be loaded: {:#}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start the async runtime: {}", e);
            std::process::exit(1);
        }
    };

    // Non-interactive: print the host probe report and exit.
    if options.capabilities {
        match runtime.block_on(installer_service::capabilities_json(Arc::new(settings))) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{:#}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    let logging = resolve_log_folder(&settings)
        .and_then(|dir| installer_service::init_logging(&dir, true));
    if let Err(e) = logging {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    if let Err(e) = runtime.block_on(installer_service::run_server(settings)) {
        log::error!("[PHASE: shutdown] Installer failed: {:#}", e);
        eprintln!("Installer failed: {:#}", e);
        std::process::exit(1);
    }
}
