//! Persisted installer configuration.
//!
//! The store is a single TOML file holding the launcher settings and the
//! per-package update state (latest/skipped version, last check time).
//! Unknown keys are ignored on load and missing keys take their defaults.

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Config file name inside the installer data directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Update state of one package that survives across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageState {
    pub latest_version: String,
    pub skipped_version: String,
    /// Unix timestamp of the last remote version check.
    pub update_check_time: i64,
}

/// Settings shared by the update orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    pub auto_update: bool,
    pub packages: BTreeMap<String, PackageState>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            auto_update: true,
            packages: BTreeMap::new(),
        }
    }
}

/// Launcher deployment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSettings {
    pub installation_dir: PathBuf,
    pub create_shortcut: bool,
    /// Model importer the launcher should open with (`WWMI`, `ZZMI`, ...).
    pub instance: String,
    /// Minisign public key that launcher packages are signed with.
    pub public_key: String,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            installation_dir: default_installation_dir(),
            create_shortcut: true,
            instance: String::new(),
            public_key: String::new(),
        }
    }
}

/// Everything written to the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub launcher: LauncherSettings,
    pub packages: UpdaterConfig,
}

/// Default launcher installation directory (`<data dir>/XXMI Launcher`).
pub fn default_installation_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("XXMI Launcher")
}

/// Default config file location (`<data dir>/XXMI Installer/config.toml`).
pub fn default_config_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("XXMI Installer")
        .join(CONFIG_FILE_NAME)
}

/// File-backed config store.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config, returning defaults when the file does not exist yet.
    pub fn load(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config file: {}", self.path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", self.path.display()))
    }

    /// Write the config under an exclusive advisory lock.
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        let content =
            toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        // Truncate only after the lock is held so readers never see an empty file.
        #[allow(clippy::suspicious_open_options)]
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open config file: {}", self.path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock config file: {}", self.path.display()))?;
        file.set_len(0)
            .with_context(|| format!("Failed to truncate config file: {}", self.path.display()))?;

        let mut writer = BufWriter::new(&file);
        writer
            .write_all(content.as_bytes())
            .with_context(|| format!("Failed to write config file: {}", self.path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush config file: {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "config saved");
        Ok(())
    }
}

/// Destination of the package state after each update run.
pub trait StateStore: Send {
    fn save_state(&mut self, state: &UpdaterConfig) -> Result<()>;
}

/// Loaded config file; saving package state rewrites the whole file.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    store: ConfigStore,
    config: AppConfig,
}

impl ConfigFile {
    pub fn load(store: ConfigStore) -> Result<Self> {
        let config = store.load()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn save(&self) -> Result<()> {
        self.store.save(&self.config)
    }
}

impl StateStore for ConfigFile {
    fn save_state(&mut self, state: &UpdaterConfig) -> Result<()> {
        self.config.packages = state.clone();
        self.save()
    }
}
