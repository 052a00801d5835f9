use crate::settings::InstallerSettings;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Resolve the install root to an absolute directory. It must already exist.
pub fn resolve_install_root(settings: &InstallerSettings) -> Result<PathBuf> {
    let root = settings.install_root();
    let abs = root
        .canonicalize()
        .with_context(|| format!("Install root is not accessible: {:?}", root))?;
    if !abs.is_dir() {
        anyhow::bail!("Install root is not a directory: {:?}", abs);
    }
    Ok(abs)
}

/// Resolve (and create) the log folder.
///
/// Defaults to `<install_root>/.installer/logs` so logs sit beside the state file and are
/// removed together with it when the operator cleans up.
pub fn resolve_log_folder(settings: &InstallerSettings) -> Result<PathBuf> {
    let dir = match &settings.paths.log_dir {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => settings.install_root().join(p),
        None => settings.install_root().join(".installer").join("logs"),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", dir, e))?;
    Ok(dir)
}
