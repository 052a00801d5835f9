// Requirement checks for the Requirements step
//
// Read-only apart from write-probe marker files, which are removed immediately.

use super::capabilities::CapabilityReport;
use super::files::probe_writable;
use crate::models::responses::RequirementCheck;
use crate::settings::InstallerSettings;
use log::info;

fn mib(bytes: u64) -> u64 {
    bytes / (1024 * 1024)
}

/// Build the requirements report. Any `Fail` blocks the step.
pub async fn check_requirements(
    settings: &InstallerSettings,
    report: &CapabilityReport,
) -> Vec<RequirementCheck> {
    let mut checks = Vec::new();
    let bundle = settings.bundle_path();

    checks.push(if report.archive_support_available {
        RequirementCheck::pass("Archive support", "Bundles can be extracted automatically")
    } else {
        RequirementCheck::warn(
            "Archive support",
            format!(
                "Automatic extraction is unavailable. Extract {} into {} manually.",
                settings.bundle.file_name,
                settings.install_root().display()
            ),
        )
    });

    checks.push(if report.max_upload_bytes > 0 {
        RequirementCheck::pass(
            "Upload limit",
            format!("Bundles up to {} MiB can be uploaded", mib(report.max_upload_bytes)),
        )
    } else {
        RequirementCheck::warn(
            "Upload limit",
            format!("Uploads are disabled. Copy the bundle to {} instead.", bundle.display()),
        )
    });

    let min_free = settings.requirements.min_free_bytes;
    checks.push(match report.free_disk_bytes {
        Some(free) if free >= min_free => RequirementCheck::pass(
            "Free disk space",
            format!("{} MiB available", mib(free)),
        ),
        Some(free) => RequirementCheck::fail(
            "Free disk space",
            format!(
                "{} MiB available, at least {} MiB required",
                mib(free),
                mib(min_free)
            ),
        ),
        None => RequirementCheck::warn(
            "Free disk space",
            "Free space could not be determined on this host",
        ),
    });

    for dir in &settings.requirements.writable_dirs {
        let path = settings.install_root().join(dir);
        let name = format!("Writable: {}", dir);
        checks.push(if probe_writable(&path).await {
            RequirementCheck::pass(name, format!("{} is writable", path.display()))
        } else {
            RequirementCheck::fail(
                name,
                format!("{} must exist and be writable by the installer", path.display()),
            )
        });
    }

    info!(
        "[PHASE: requirements] [STEP: check] {} checks, overall={}",
        checks.len(),
        crate::models::responses::overall_status(&checks)
    );
    checks
}

/// Operator-facing messages for failed checks, in report order.
pub fn blocking_failures(checks: &[RequirementCheck]) -> Vec<String> {
    checks
        .iter()
        .filter(|c| c.is_failure())
        .map(|c| format!("{}: {}", c.name, c.detail))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(archive: bool, free: Option<u64>) -> CapabilityReport {
        CapabilityReport {
            archive_support_available: archive,
            max_upload_bytes: 1024 * 1024,
            free_disk_bytes: free,
            capabilities: Vec::new(),
        }
    }

    fn settings_for(root: &std::path::Path) -> InstallerSettings {
        let mut s = InstallerSettings::default();
        s.paths.install_root = root.to_path_buf();
        s.requirements.min_free_bytes = 10;
        s
    }

    #[tokio::test]
    async fn healthy_host_passes() {
        let dir = tempfile::tempdir().unwrap();
        let checks = check_requirements(&settings_for(dir.path()), &report(true, Some(100))).await;
        assert!(blocking_failures(&checks).is_empty(), "checks={:?}", checks);
    }

    #[tokio::test]
    async fn missing_archive_support_only_warns() {
        let dir = tempfile::tempdir().unwrap();
        let checks = check_requirements(&settings_for(dir.path()), &report(false, None)).await;
        let archive = checks.iter().find(|c| c.name == "Archive support").unwrap();
        assert_eq!(archive.status, "Warn");
        assert!(archive.detail.contains("manually"), "{}", archive.detail);
        assert!(blocking_failures(&checks).is_empty());
    }

    #[tokio::test]
    async fn low_disk_and_unwritable_dirs_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_for(dir.path());
        settings.requirements.writable_dirs = vec![".".to_string(), "missing".to_string()];

        let checks = check_requirements(&settings, &report(true, Some(1))).await;
        let failures = blocking_failures(&checks);
        assert_eq!(failures.len(), 2, "failures={:?}", failures);
        assert!(failures[0].starts_with("Free disk space"));
        assert!(failures[1].starts_with("Writable: missing"));
    }
}
