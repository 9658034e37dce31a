//! Install or update the XXMI Launcher from the command line.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

use super::render::attach_console;
use crate::config::{default_config_path, ConfigFile, ConfigStore, LauncherSettings};
use crate::events::{Event, EventBus};
use crate::orchestrator::{UpdateOptions, UpdateOrchestrator, UpdateOutcome};
use crate::package::launcher::{launcher_metadata, LAUNCHER_PACKAGE_NAME};
use crate::package::{LauncherInstaller, Package, UpdateContext};
use crate::worker::UpdateWorker;

/// How the binary was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Fresh installation requested by the user.
    Installer,
    /// Started by the launcher to replace itself; always reinstalls.
    Updater,
}

#[derive(Debug, Clone)]
pub struct InstallArgs {
    pub mode: Mode,
    pub dist_dir: Option<PathBuf>,
    pub no_shortcut: bool,
    pub config: Option<PathBuf>,
    pub no_install: bool,
    pub force: bool,
    pub reinstall: bool,
    pub packages: Vec<String>,
}

impl InstallArgs {
    fn update_options(&self) -> UpdateOptions {
        let updater = self.mode == Mode::Updater;
        UpdateOptions {
            no_install: self.no_install,
            force: self.force || updater,
            reinstall: self.reinstall || updater,
            packages: (!self.packages.is_empty()).then(|| self.packages.clone()),
        }
    }
}

/// Model importer the installer binary was named after (`WWMI` by default).
pub fn detect_instance(exe_name: &str) -> &'static str {
    const INSTANCES: [(&str, &str); 4] = [
        ("WW", "WWMI"),
        ("ZZZ", "ZZMI"),
        ("HSR", "SRMI"),
        ("GI", "GIMI"),
    ];
    INSTANCES
        .iter()
        .find(|(marker, _)| exe_name.contains(marker))
        .map_or("WWMI", |(_, instance)| *instance)
}

fn apply_overrides(settings: &mut LauncherSettings, args: &InstallArgs, exe_name: &str) {
    if let Some(dir) = &args.dist_dir {
        settings.installation_dir = dir.clone();
    }
    if args.no_shortcut {
        settings.create_shortcut = false;
    }
    if settings.instance.is_empty() {
        settings.instance = detect_instance(exe_name).to_string();
    }
}

fn downloads_dir(install_dir: &Path) -> PathBuf {
    install_dir
        .join("Resources")
        .join("Packages")
        .join(LAUNCHER_PACKAGE_NAME)
}

/// Execute an install/update run and report its outcome.
pub fn execute(args: InstallArgs) -> Result<UpdateOutcome> {
    let store = ConfigStore::new(args.config.clone().unwrap_or_else(default_config_path));
    let mut config_file = ConfigFile::load(store)?;

    let current_exe = std::env::current_exe().ok();
    let exe_name = current_exe
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    apply_overrides(&mut config_file.config_mut().launcher, &args, &exe_name);
    config_file.save()?;

    let settings = config_file.config().launcher.clone();
    let updater_config = config_file.config().packages.clone();
    if settings.public_key.is_empty() {
        tracing::warn!("no launcher signing key configured, downloads will fail verification");
    }

    let events = EventBus::new();
    attach_console(&events);

    let mut installer = LauncherInstaller::new(settings.clone());
    if let Some(exe) = &current_exe {
        installer = installer.with_installer_binary(exe);
    }
    let package = Package::from_github(
        launcher_metadata(&settings.public_key),
        Box::new(installer),
        UpdateContext::new(events.clone(), downloads_dir(&settings.installation_dir)),
    )?;

    let orchestrator = UpdateOrchestrator::new(
        vec![package],
        updater_config,
        Box::new(config_file),
        events.clone(),
    )?;

    println!(
        "{} {} into {}",
        "XXMI Installer".bold(),
        match args.mode {
            Mode::Installer => "installing",
            Mode::Updater => "updating",
        },
        settings.installation_dir.display()
    );
    events.publish(Event::Ready);

    let mut worker = UpdateWorker::new(orchestrator);
    let results = worker.start(args.update_options())?;
    let outcome = results
        .recv()
        .context("Update worker stopped without reporting a result")??;
    worker.join();

    match &outcome {
        UpdateOutcome::Completed => {
            println!("{} Done", "✓".green().bold());
        }
        UpdateOutcome::ExitRequested { package } => {
            println!("{} {package} updated", "✓".green().bold());
        }
    }
    Ok(outcome)
}
