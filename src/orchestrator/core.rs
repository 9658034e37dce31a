//! Update orchestrator
//!
//! Walks the package list in order and, for each package:
//! - refreshes the installed version
//! - checks the feed, at most once an hour unless an install is pending
//! - decides whether to install and runs the package pipeline
//! - stops the whole run after a package flagged `exit_after_update`

use chrono::Utc;
use std::collections::BTreeMap;

use crate::config::{PackageState, StateStore, UpdaterConfig};
use crate::error::UpdateError;
use crate::events::{Event, EventBus, PackageVersions};
use crate::package::Package;

/// Minimum interval between unforced feed checks for one package.
pub const UPDATE_CHECK_INTERVAL_SECS: i64 = 3600;

/// Delay of the close signal sent after an `exit_after_update` package.
pub const CLOSE_DELAY_MS: u64 = 500;

/// Flags of one update run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Check versions but never install.
    pub no_install: bool,
    /// Install even when auto-update is disabled.
    pub force: bool,
    /// Install even when up to date, from scratch.
    pub reinstall: bool,
    /// Restrict the run to these package names.
    pub packages: Option<Vec<String>>,
}

/// How an update run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Every selected package was processed.
    Completed,
    /// A package asked for the application to close after installing.
    ExitRequested { package: String },
}

fn wants_install(package: &Package, options: &UpdateOptions, auto_update: bool) -> bool {
    !options.no_install
        && (package.update_available() || options.reinstall)
        && (auto_update || options.force)
}

/// Drives the ordered package list through version checks and updates.
pub struct UpdateOrchestrator {
    packages: Vec<Package>,
    config: UpdaterConfig,
    store: Box<dyn StateStore>,
    events: EventBus,
}

impl std::fmt::Debug for UpdateOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateOrchestrator")
            .field("packages", &self.packages)
            .field("auto_update", &self.config.auto_update)
            .finish_non_exhaustive()
    }
}

impl UpdateOrchestrator {
    /// Take ownership of `packages` and attach each to its persisted state.
    ///
    /// Installed versions are detected right away so cached latest versions
    /// can drive a decision even when the feed check is throttled.
    pub fn new(
        mut packages: Vec<Package>,
        mut config: UpdaterConfig,
        store: Box<dyn StateStore>,
        events: EventBus,
    ) -> Result<Self, UpdateError> {
        for package in &mut packages {
            package.detect_installed_version()?;
            let state = config
                .packages
                .entry(package.name().to_string())
                .or_default()
                .clone();
            package.attach_state(state);
        }

        Ok(Self {
            packages,
            config,
            store,
            events,
        })
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn package_mut(&mut self, name: &str) -> Option<&mut Package> {
        self.packages.iter_mut().find(|p| p.name() == name)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current configuration including every package's live state.
    pub fn config(&self) -> UpdaterConfig {
        let mut config = self.config.clone();
        for package in &self.packages {
            config
                .packages
                .insert(package.name().to_string(), package.state().clone());
        }
        config
    }

    /// True when any package has a newer (or different) version available.
    pub fn update_available(&self) -> bool {
        self.packages.iter().any(Package::update_available)
    }

    /// Snapshot of installed/latest/skipped versions of active packages.
    pub fn version_notification(&self) -> Event {
        let package_states: BTreeMap<String, PackageVersions> = self
            .packages
            .iter()
            .filter(|p| p.is_active())
            .map(|p| {
                (
                    p.name().to_string(),
                    PackageVersions {
                        installed_version: p.installed_version().to_string(),
                        latest_version: p.state().latest_version.clone(),
                        skipped_version: p.state().skipped_version.clone(),
                    },
                )
            })
            .collect();

        Event::VersionNotification {
            auto_update: self.config.auto_update,
            package_states,
        }
    }

    /// Mark every package's latest version as skipped.
    pub fn skip_latest_updates(&mut self) {
        for package in &mut self.packages {
            let state: &mut PackageState = package.state_mut();
            state.skipped_version = state.latest_version.clone();
        }
    }

    /// Persist state and publish the version notification.
    pub fn notify_package_versions(&mut self) -> Result<(), UpdateError> {
        self.persist()?;
        self.events.publish(self.version_notification());
        Ok(())
    }

    fn persist(&mut self) -> Result<(), UpdateError> {
        self.config = self.config();
        self.store
            .save_state(&self.config)
            .map_err(|e| UpdateError::State(e.into()))
    }

    /// Run one update pass over all packages.
    ///
    /// The first failing package aborts the run and its error is returned.
    pub fn update_packages(
        &mut self,
        options: &UpdateOptions,
    ) -> Result<UpdateOutcome, UpdateError> {
        self.update_packages_at(options, Utc::now().timestamp())
    }

    /// [`update_packages`](Self::update_packages) with an explicit clock.
    pub fn update_packages_at(
        &mut self,
        options: &UpdateOptions,
        now: i64,
    ) -> Result<UpdateOutcome, UpdateError> {
        let auto_update = self.config.auto_update;

        for index in 0..self.packages.len() {
            let package = &mut self.packages[index];
            if !package.is_active() {
                continue;
            }
            if let Some(selected) = &options.packages {
                if !selected.iter().any(|name| name == package.name()) {
                    continue;
                }
            }

            // Decided before the refresh: a pending install needs a fresh URL.
            let install_pending = wants_install(package, options, auto_update);

            package.detect_installed_version()?;

            let last_check = package.state().update_check_time;
            let force_check = install_pending || last_check > now;
            if force_check || last_check + UPDATE_CHECK_INTERVAL_SECS < now {
                package.detect_latest_version()?;
                package.state_mut().update_check_time = now;
            } else {
                tracing::debug!(
                    package = %package.name(),
                    next_check_in = last_check + UPDATE_CHECK_INTERVAL_SECS - now,
                    "feed check throttled"
                );
            }

            if !wants_install(package, options, auto_update) {
                continue;
            }

            package.update(options.reinstall)?;

            if package.metadata().exit_after_update {
                let name = package.name().to_string();
                tracing::info!(package = %name, "package requires exit after update");
                self.persist()?;
                self.events.publish(Event::CloseApplication {
                    delay_ms: CLOSE_DELAY_MS,
                });
                return Ok(UpdateOutcome::ExitRequested { package: name });
            }
        }

        self.notify_package_versions()?;
        Ok(UpdateOutcome::Completed)
    }
}
