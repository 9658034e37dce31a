//! The XXMI Launcher package.
//!
//! Installing it means stopping a running launcher, unpacking the new build,
//! keeping a copy of this installer next to it and starting the launcher in
//! update mode.

use anyhow::Context as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use super::{
    read_version_marker, write_version_marker, InstallContext, Installable, PackageMetadata,
};
use crate::config::LauncherSettings;
use crate::error::UpdateError;
use crate::events::Event;
use crate::process::WaitResult;
use crate::signature::compute_sha256_checksum;

pub const LAUNCHER_PACKAGE_NAME: &str = "Launcher";
pub const LAUNCHER_EXE: &str = "XXMI Launcher.exe";
pub const INSTALLER_EXE: &str = "XXMI-Installer.exe";

const VERSION_MARKER: &str = ".launcher.version";

/// Minisign signature in a fenced block under a `## Signature` heading.
pub const SIGNATURE_PATTERN: &str =
    r"(?s)## Signature\s*```(?:minisign)?\s*(untrusted comment:.*?)\s*```";

/// Release metadata of the launcher package, verified with `public_key`.
pub fn launcher_metadata(public_key: &str) -> PackageMetadata {
    PackageMetadata {
        package_name: LAUNCHER_PACKAGE_NAME.to_string(),
        repo_owner: "SpectrumQT".to_string(),
        repo_name: "XXMI-Launcher".to_string(),
        asset_version_pattern: r"(\d+\.\d+\.\d+)".to_string(),
        asset_name_format: "XXMI-LAUNCHER-PACKAGE-v{version}.zip".to_string(),
        signature_pattern: SIGNATURE_PATTERN.to_string(),
        signature_public_key: public_key.to_string(),
        exit_after_update: true,
    }
}

/// Process wait limits used while replacing the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LauncherTimeouts {
    /// How long a running launcher gets to exit.
    pub exit: Duration,
    /// When to start killing a launcher that does not exit.
    pub kill: Duration,
    /// How long the restarted launcher gets to show a window.
    pub start: Duration,
}

impl Default for LauncherTimeouts {
    fn default() -> Self {
        Self {
            exit: Duration::from_secs(10),
            kill: Duration::from_secs(5),
            start: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LauncherInstaller {
    settings: LauncherSettings,
    timeouts: LauncherTimeouts,
    /// Installer binary to keep a copy of inside the launcher resources.
    installer_binary: Option<PathBuf>,
}

impl LauncherInstaller {
    pub fn new(settings: LauncherSettings) -> Self {
        Self {
            settings,
            timeouts: LauncherTimeouts::default(),
            installer_binary: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: LauncherTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_installer_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.installer_binary = Some(path.into());
        self
    }

    fn install_dir(&self) -> &Path {
        &self.settings.installation_dir
    }

    fn marker_path(&self) -> PathBuf {
        self.install_dir().join(VERSION_MARKER)
    }

    pub fn launcher_path(&self) -> PathBuf {
        self.install_dir().join(LAUNCHER_EXE)
    }

    /// Where the installer keeps a copy of itself for later repairs.
    pub fn installer_copy_path(&self) -> PathBuf {
        self.install_dir()
            .join("Resources")
            .join("Packages")
            .join("Installer")
            .join(INSTALLER_EXE)
    }

    /// Arguments the launcher is started with after an update.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec!["--update".to_string()];
        if !self.settings.instance.is_empty() {
            args.push("--xxmi".to_string());
            args.push(self.settings.instance.clone());
        }
        args
    }

    fn stop_launcher(&self, ctx: &InstallContext<'_>) -> Result<(), UpdateError> {
        ctx.events().publish(Event::WaitForProcessExit {
            process_name: LAUNCHER_EXE.to_string(),
        });
        let result = ctx.waiter().wait_for_process_exit(
            LAUNCHER_EXE,
            Some(self.timeouts.exit),
            Some(self.timeouts.kill),
        )?;
        match result {
            WaitResult::Timeout => Err(UpdateError::process_control(
                LAUNCHER_EXE,
                format!(
                    "Failed to terminate {LAUNCHER_EXE}!\n\n\
                     Please close it manually and try again."
                ),
            )),
            other => {
                tracing::debug!(?other, "launcher is not running");
                Ok(())
            }
        }
    }

    /// Copy the installer binary unless an identical copy is already there.
    fn store_installer_copy(&self, ctx: &InstallContext<'_>) -> anyhow::Result<()> {
        let Some(source) = &self.installer_binary else {
            return Ok(());
        };
        let dest = self.installer_copy_path();

        let current = fs::read(source)
            .with_context(|| format!("Failed to read installer binary: {}", source.display()))?;
        if let Ok(existing) = fs::read(&dest) {
            if compute_sha256_checksum(&existing) == compute_sha256_checksum(&current) {
                tracing::debug!(dest = %dest.display(), "installer copy is up to date");
                return Ok(());
            }
        }

        ctx.events().publish(Event::StartFileWrite {
            asset_name: INSTALLER_EXE.to_string(),
        });
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(&dest, &current)
            .with_context(|| format!("Failed to copy installer to {}", dest.display()))?;
        Ok(())
    }

    fn start_launcher(&self, ctx: &InstallContext<'_>) -> Result<(), UpdateError> {
        let launcher = self.launcher_path();
        ctx.events().publish(Event::StartLauncher {
            asset_name: launcher.display().to_string(),
        });

        if !launcher.is_file() {
            return Err(UpdateError::process_control(
                LAUNCHER_EXE,
                format!(
                    "Failed to locate {}!\n\n\
                     Was it removed by your antivirus software?",
                    launcher.display()
                ),
            ));
        }

        Command::new(&launcher)
            .args(self.launch_args())
            .current_dir(self.install_dir())
            .spawn()
            .map_err(|e| {
                UpdateError::process_control(
                    LAUNCHER_EXE,
                    format!(
                        "Failed to start {LAUNCHER_EXE}: {e}\n\n\
                         Installation failed or was blocked by antivirus software."
                    ),
                )
            })?;

        ctx.events().publish(Event::WaitForProcess {
            process_name: LAUNCHER_EXE.to_string(),
        });
        match ctx
            .waiter()
            .wait_for_process(LAUNCHER_EXE, Some(self.timeouts.start), true)?
        {
            WaitResult::Found(pid) => {
                tracing::info!(pid, "launcher started");
                Ok(())
            }
            _ => Err(UpdateError::process_control(
                LAUNCHER_EXE,
                format!(
                    "Failed to start {LAUNCHER_EXE}!\n\n\
                     Installation failed or was blocked by antivirus software."
                ),
            )),
        }
    }
}

impl Installable for LauncherInstaller {
    fn installed_version(&self) -> anyhow::Result<String> {
        read_version_marker(&self.marker_path())
    }

    fn install(&mut self, ctx: &mut InstallContext<'_>, clean: bool) -> Result<(), UpdateError> {
        ctx.events().publish(Event::InitializeInstallation);
        self.stop_launcher(ctx)?;

        if clean {
            // An interrupted reinstall must not look like a finished one.
            let marker = self.marker_path();
            if marker.exists() {
                fs::remove_file(&marker)
                    .map_err(|e| UpdateError::install(ctx.package_name(), e))?;
            }
        }

        let install_dir = self.install_dir().to_path_buf();
        ctx.unpack_downloaded_asset(&install_dir)?;

        self.store_installer_copy(ctx)
            .map_err(|e| UpdateError::install(ctx.package_name(), e))?;

        if self.settings.create_shortcut {
            ctx.events().publish(Event::StartCreateShortcuts);
        }

        write_version_marker(&self.marker_path(), ctx.version())
            .map_err(|e| UpdateError::install(ctx.package_name(), e))?;

        self.start_launcher(ctx)
    }
}
