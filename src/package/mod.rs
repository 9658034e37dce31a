//! Installable packages and their version/installation lifecycle.
//!
//! A [`Package`] owns one unit's metadata and cached remote state and performs
//! the generic steps (version checks, download, double signature check). The
//! concrete deployment is delegated to an [`Installable`] chosen at
//! construction by [`create_installer`].

pub mod archive;
pub mod launcher;


use anyhow::Context as _;
use regex::{Regex, RegexBuilder};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::extract_zip;
use crate::config::{LauncherSettings, PackageState};
use crate::error::UpdateError;
use crate::events::{Event, EventBus};
use crate::feed::{asset_file_name, GitHubReleases, VersionSource, DOWNLOAD_BLOCK_SIZE};
use crate::process::ProcessWaiter;
use crate::signature::{MinisignVerifier, Verifier};

pub use archive::ArchiveInstaller;
pub use launcher::LauncherInstaller;

/// Static description of a package, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub package_name: String,
    pub repo_owner: String,
    pub repo_name: String,
    /// First capture group yields the version token.
    pub asset_version_pattern: String,
    /// Asset file name with a `{version}` placeholder.
    pub asset_name_format: String,
    /// First capture group yields the detached signature from release notes.
    pub signature_pattern: String,
    pub signature_public_key: String,
    /// Stop the whole update run once this package is installed.
    pub exit_after_update: bool,
}

/// Shared collaborators handed to every package.
#[derive(Debug, Clone)]
pub struct UpdateContext {
    pub events: EventBus,
    pub waiter: ProcessWaiter,
    /// Where verified archives are stored before installation.
    pub downloads_dir: PathBuf,
}

impl UpdateContext {
    pub fn new(events: EventBus, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            events,
            waiter: ProcessWaiter::new(),
            downloads_dir: downloads_dir.into(),
        }
    }

    pub fn with_waiter(mut self, waiter: ProcessWaiter) -> Self {
        self.waiter = waiter;
        self
    }
}

/// Deployment step of a concrete package type.
pub trait Installable: Send {
    /// Currently deployed version, empty when not installed.
    fn installed_version(&self) -> anyhow::Result<String>;

    /// Deploy the verified download. `clean` requests a from-scratch reinstall.
    fn install(&mut self, ctx: &mut InstallContext<'_>, clean: bool) -> Result<(), UpdateError>;
}

/// Installer variants known to the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageKind {
    /// The XXMI Launcher itself.
    Launcher(LauncherSettings),
    /// Plain archive unpacked into a directory.
    Archive { target_dir: PathBuf },
}

/// Build the installer for `kind`.
pub fn create_installer(package_name: &str, kind: PackageKind) -> Box<dyn Installable> {
    match kind {
        PackageKind::Launcher(settings) => Box::new(LauncherInstaller::new(settings)),
        PackageKind::Archive { target_dir } => {
            Box::new(ArchiveInstaller::new(package_name, target_dir))
        }
    }
}

/// What an installer gets to work with during [`Installable::install`].
pub struct InstallContext<'a> {
    package_name: &'a str,
    version: &'a str,
    events: &'a EventBus,
    waiter: &'a ProcessWaiter,
    downloaded_asset: Option<PathBuf>,
    installed_asset: Option<PathBuf>,
}

impl<'a> InstallContext<'a> {
    pub fn package_name(&self) -> &str {
        self.package_name
    }

    /// Version being installed.
    pub fn version(&self) -> &str {
        self.version
    }

    pub fn events(&self) -> &EventBus {
        self.events
    }

    pub fn waiter(&self) -> &ProcessWaiter {
        self.waiter
    }

    pub fn downloaded_asset(&self) -> Option<&Path> {
        self.downloaded_asset.as_deref()
    }

    /// Extract the verified archive into `destination` and delete it.
    ///
    /// Runs once per download; a second call fails.
    pub fn unpack_downloaded_asset(&mut self, destination: &Path) -> Result<(), UpdateError> {
        let asset = self.downloaded_asset.take().ok_or_else(|| {
            UpdateError::install(
                self.package_name,
                anyhow::anyhow!("No downloaded asset to unpack"),
            )
        })?;
        unpack_asset(self.events, self.package_name, &asset, destination)?;
        self.installed_asset = Some(destination.to_path_buf());
        Ok(())
    }
}

fn unpack_asset(
    events: &EventBus,
    package_name: &str,
    asset: &Path,
    destination: &Path,
) -> Result<(), UpdateError> {
    events.publish(Event::StartUnpack {
        asset_name: file_name(asset),
    });
    extract_zip(asset, destination).map_err(|e| UpdateError::install(package_name, e))?;
    fs::remove_file(asset)
        .with_context(|| format!("Failed to remove {}", asset.display()))
        .map_err(|e| UpdateError::install(package_name, e))?;
    tracing::info!(package = package_name, dest = %destination.display(), "asset unpacked");
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read a version marker file; a missing file means "not installed".
pub(crate) fn read_version_marker(path: &Path) -> anyhow::Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read version file: {}", path.display()))
        }
    }
}

pub(crate) fn write_version_marker(path: &Path, version: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, version)
        .with_context(|| format!("Failed to write version file: {}", path.display()))
}

/// Download location and signature of the latest release.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteAsset {
    download_url: String,
    signature: String,
}

/// One independently versioned, installable unit.
pub struct Package {
    metadata: PackageMetadata,
    version_pattern: Regex,
    signature_pattern: Regex,
    source: Arc<dyn VersionSource>,
    verifier: Arc<dyn Verifier>,
    installer: Box<dyn Installable>,
    ctx: UpdateContext,
    state: PackageState,
    /// Only meaningful after `detect_installed_version` succeeded this run.
    installed_version: String,
    remote: Option<RemoteAsset>,
    downloaded_asset_path: Option<PathBuf>,
    installed_asset_path: Option<PathBuf>,
    active: bool,
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.metadata.package_name)
            .field("installed_version", &self.installed_version)
            .field("latest_version", &self.state.latest_version)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl Package {
    pub fn new(
        metadata: PackageMetadata,
        installer: Box<dyn Installable>,
        source: Arc<dyn VersionSource>,
        verifier: Arc<dyn Verifier>,
        ctx: UpdateContext,
    ) -> Result<Self, UpdateError> {
        let name = metadata.package_name.clone();
        let version_pattern = Regex::new(&metadata.asset_version_pattern)
            .with_context(|| format!("Invalid version pattern for {name}"))
            .map_err(|e| UpdateError::feed(&name, e))?;
        let signature_pattern = RegexBuilder::new(&metadata.signature_pattern)
            .multi_line(true)
            .build()
            .with_context(|| format!("Invalid signature pattern for {name}"))
            .map_err(|e| UpdateError::feed(&name, e))?;

        Ok(Self {
            metadata,
            version_pattern,
            signature_pattern,
            source,
            verifier,
            installer,
            ctx,
            state: PackageState::default(),
            installed_version: String::new(),
            remote: None,
            downloaded_asset_path: None,
            installed_asset_path: None,
            active: true,
        })
    }

    /// Package fed by the GitHub repository named in its metadata and verified
    /// with its minisign key.
    pub fn from_github(
        metadata: PackageMetadata,
        installer: Box<dyn Installable>,
        ctx: UpdateContext,
    ) -> Result<Self, UpdateError> {
        let source = Arc::new(GitHubReleases::new(&metadata.repo_owner, &metadata.repo_name));
        let verifier = Arc::new(MinisignVerifier::new(&metadata.signature_public_key));
        Self::new(metadata, installer, source, verifier, ctx)
    }

    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    pub fn name(&self) -> &str {
        &self.metadata.package_name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn state(&self) -> &PackageState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut PackageState {
        &mut self.state
    }

    pub(crate) fn attach_state(&mut self, state: PackageState) {
        self.state = state;
    }

    pub fn installed_version(&self) -> &str {
        &self.installed_version
    }

    pub fn latest_version(&self) -> &str {
        &self.state.latest_version
    }

    /// URL of the latest asset, empty until a successful remote check.
    pub fn download_url(&self) -> &str {
        self.remote.as_ref().map_or("", |r| r.download_url.as_str())
    }

    pub fn signature(&self) -> &str {
        self.remote.as_ref().map_or("", |r| r.signature.as_str())
    }

    pub fn downloaded_asset_path(&self) -> Option<&Path> {
        self.downloaded_asset_path.as_deref()
    }

    pub fn installed_asset_path(&self) -> Option<&Path> {
        self.installed_asset_path.as_deref()
    }

    /// Probe the deployed version; clears it on failure.
    pub fn detect_installed_version(&mut self) -> Result<(), UpdateError> {
        match self.installer.installed_version() {
            Ok(version) => {
                tracing::debug!(package = %self.name(), %version, "installed version detected");
                self.installed_version = version;
                Ok(())
            }
            Err(e) => {
                self.installed_version.clear();
                Err(UpdateError::detection(&self.metadata.package_name, e))
            }
        }
    }

    /// Ask the feed for the latest release.
    ///
    /// Version, URL and signature are replaced together, or all reset on failure.
    pub fn detect_latest_version(&mut self) -> Result<(), UpdateError> {
        let result = self.source.fetch_latest_release(
            &self.version_pattern,
            &self.metadata.asset_name_format,
            &self.signature_pattern,
        );
        match result {
            Ok(release) => {
                tracing::info!(package = %self.name(), version = %release.version, "latest version detected");
                self.state.latest_version = release.version;
                self.remote = Some(RemoteAsset {
                    download_url: release.download_url,
                    signature: release.signature,
                });
                Ok(())
            }
            Err(e) => {
                self.state.latest_version.clear();
                self.remote = None;
                Err(UpdateError::feed(&self.metadata.package_name, e))
            }
        }
    }

    /// Versions are opaque tokens: any difference from a known latest counts.
    pub fn update_available(&self) -> bool {
        !self.state.latest_version.is_empty() && self.installed_version != self.state.latest_version
    }

    /// Download the latest asset, verify it in memory, persist it and verify
    /// the persisted bytes again.
    pub fn download_latest_version(&mut self) -> Result<(), UpdateError> {
        self.downloaded_asset_path = None;
        let name = self.metadata.package_name.clone();
        let events = self.ctx.events.clone();

        events.publish(Event::InitializeDownload);

        let remote = self.remote.clone().ok_or_else(|| {
            UpdateError::download(
                &name,
                anyhow::anyhow!("No download URL known for {name}, check for updates first"),
            )
        })?;
        let asset_name =
            asset_file_name(&self.metadata.asset_name_format, &self.state.latest_version);

        events.publish(Event::StartDownload {
            asset_name: asset_name.clone(),
        });

        let data = self
            .source
            .download_data(&remote.download_url, DOWNLOAD_BLOCK_SIZE, &mut |downloaded, total| {
                events.publish(Event::UpdateDownloadProgress {
                    downloaded_bytes: downloaded,
                    total_bytes: total,
                })
            })
            .map_err(|e| UpdateError::download(&name, e))?;

        events.publish(Event::InitializeInstallation);
        events.publish(Event::StartIntegrityVerification {
            asset_name: "downloaded data".to_string(),
        });
        if !self.verifier.verify(&remote.signature, &data) {
            return Err(UpdateError::integrity("Downloaded data"));
        }

        events.publish(Event::StartFileWrite {
            asset_name: asset_name.clone(),
        });
        let asset_path = self.ctx.downloads_dir.join(&asset_name);
        self.write_asset(&asset_path, &data)
            .map_err(|e| UpdateError::install(&name, e))?;

        events.publish(Event::StartIntegrityVerification {
            asset_name: asset_name.clone(),
        });
        let written = fs::read(&asset_path)
            .with_context(|| format!("Failed to read {}", asset_path.display()))
            .map_err(|e| UpdateError::install(&name, e))?;
        if !self.verifier.verify(&remote.signature, &written) {
            let _ = fs::remove_file(&asset_path);
            return Err(UpdateError::integrity(asset_name));
        }

        tracing::info!(package = %name, path = %asset_path.display(), "asset downloaded and verified");
        self.downloaded_asset_path = Some(asset_path);
        Ok(())
    }

    fn write_asset(&self, asset_path: &Path, data: &[u8]) -> anyhow::Result<()> {
        let dir = &self.ctx.downloads_dir;
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create downloads directory: {}", dir.display()))?;

        let mut staging = tempfile::NamedTempFile::new_in(dir)
            .context("Failed to create staging file for download")?;
        staging
            .write_all(data)
            .context("Failed to write downloaded data")?;
        staging
            .as_file()
            .sync_all()
            .context("Failed to sync downloaded data to disk")?;
        staging
            .persist(asset_path)
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to move download to {}", asset_path.display()))?;
        Ok(())
    }

    /// Extract the downloaded archive into `destination` and delete the archive.
    pub fn unpack_downloaded_asset(&mut self, destination: &Path) -> Result<(), UpdateError> {
        let asset = self.downloaded_asset_path.take().ok_or_else(|| {
            UpdateError::install(self.name(), anyhow::anyhow!("No downloaded asset to unpack"))
        })?;
        unpack_asset(&self.ctx.events, &self.metadata.package_name, &asset, destination)?;
        self.installed_asset_path = Some(destination.to_path_buf());
        Ok(())
    }

    /// Run the package-specific deployment of the downloaded asset.
    pub fn install_latest_version(&mut self, clean: bool) -> Result<(), UpdateError> {
        let mut install_ctx = InstallContext {
            package_name: &self.metadata.package_name,
            version: &self.state.latest_version,
            events: &self.ctx.events,
            waiter: &self.ctx.waiter,
            downloaded_asset: self.downloaded_asset_path.take(),
            installed_asset: None,
        };

        let result = self.installer.install(&mut install_ctx, clean);

        self.downloaded_asset_path = install_ctx.downloaded_asset;
        if let Some(installed) = install_ctx.installed_asset {
            self.installed_asset_path = Some(installed);
        }
        result
    }

    /// Download, install and re-detect, stopping at the first failure.
    pub fn update(&mut self, clean: bool) -> Result<(), UpdateError> {
        tracing::info!(package = %self.name(), version = %self.state.latest_version, clean, "updating package");
        self.download_latest_version()?;
        self.install_latest_version(clean)?;
        self.detect_installed_version()
    }
}
