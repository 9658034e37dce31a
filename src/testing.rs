//! Fakes shared by the unit test suites.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{StateStore, UpdaterConfig};
use crate::error::UpdateError;
use crate::events::EventBus;
use crate::feed::{Release, VersionSource};
use crate::package::{InstallContext, Installable, PackageMetadata, UpdateContext};
use crate::process::table::ProcessTable;
use crate::process::ProcessWaiter;
use crate::signature::Verifier;

pub(crate) fn metadata(name: &str, exit_after_update: bool) -> PackageMetadata {
    PackageMetadata {
        package_name: name.to_string(),
        repo_owner: "owner".to_string(),
        repo_name: name.to_lowercase(),
        asset_version_pattern: r"(\d+\.\d+\.\d+)".to_string(),
        asset_name_format: format!("{name}-v{{version}}.zip"),
        signature_pattern: r"sig:(\S+)".to_string(),
        signature_public_key: String::new(),
        exit_after_update,
    }
}

pub(crate) fn context(events: &EventBus, downloads_dir: &Path) -> UpdateContext {
    UpdateContext::new(events.clone(), downloads_dir).with_waiter(
        ProcessWaiter::with_table(Arc::new(SwitchTable::default()))
            .with_poll_interval(Duration::from_millis(5)),
    )
}

/// Feed serving one scripted release and payload.
pub(crate) struct FakeSource {
    release: Mutex<Result<Release, String>>,
    payload: Mutex<Vec<u8>>,
    download_failure: Mutex<Option<String>>,
    pub(crate) fetches: AtomicUsize,
    pub(crate) downloads: AtomicUsize,
}

impl FakeSource {
    pub(crate) fn serving(version: &str, payload: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            release: Mutex::new(Ok(release(version))),
            payload: Mutex::new(payload),
            download_failure: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        })
    }

    pub(crate) fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            release: Mutex::new(Err(message.to_string())),
            payload: Mutex::new(Vec::new()),
            download_failure: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_version(&self, version: &str) {
        *self.release.lock().unwrap() = Ok(release(version));
    }

    pub(crate) fn set_failure(&self, message: &str) {
        *self.release.lock().unwrap() = Err(message.to_string());
    }

    pub(crate) fn set_download_failure(&self, message: &str) {
        *self.download_failure.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn set_signature(&self, signature: &str) {
        if let Ok(release) = self.release.lock().unwrap().as_mut() {
            release.signature = signature.to_string();
        }
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

fn release(version: &str) -> Release {
    Release {
        version: version.to_string(),
        download_url: format!("https://example.com/v{version}.zip"),
        signature: "sig".to_string(),
    }
}

impl VersionSource for FakeSource {
    fn fetch_latest_release(&self, _: &Regex, _: &str, _: &Regex) -> Result<Release> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.release.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }

    fn download_data(
        &self,
        _url: &str,
        block_size: usize,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.download_failure.lock().unwrap().clone() {
            return Err(anyhow!(message));
        }
        let payload = self.payload.lock().unwrap().clone();
        let total = payload.len() as u64;
        let mut done = 0u64;
        for chunk in payload.chunks(block_size.max(1)) {
            done += chunk.len() as u64;
            progress(done, total);
        }
        Ok(payload)
    }
}

pub(crate) struct AcceptAll;

impl Verifier for AcceptAll {
    fn verify(&self, _signature: &str, _payload: &[u8]) -> bool {
        true
    }
}

/// Installer that records what it was asked to do.
#[derive(Clone, Default)]
pub(crate) struct RecordingInstaller {
    pub(crate) installed: Arc<Mutex<String>>,
    /// `package@version` per install, shared across installers.
    pub(crate) log: Arc<Mutex<Vec<String>>>,
    pub(crate) fail_detection: Arc<AtomicBool>,
}

impl RecordingInstaller {
    pub(crate) fn installed_at(version: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            installed: Arc::new(Mutex::new(version.to_string())),
            log: Arc::clone(log),
            ..Self::default()
        }
    }
}

impl Installable for RecordingInstaller {
    fn installed_version(&self) -> Result<String> {
        if self.fail_detection.load(Ordering::SeqCst) {
            return Err(anyhow!("version probe failed"));
        }
        Ok(self.installed.lock().unwrap().clone())
    }

    fn install(&mut self, ctx: &mut InstallContext<'_>, clean: bool) -> Result<(), UpdateError> {
        let suffix = if clean { " (clean)" } else { "" };
        self.log
            .lock()
            .unwrap()
            .push(format!("{}@{}{suffix}", ctx.package_name(), ctx.version()));
        *self.installed.lock().unwrap() = ctx.version().to_string();
        Ok(())
    }
}

/// Process table with one process that is either running or not.
#[derive(Default)]
pub(crate) struct SwitchTable {
    pub(crate) running: AtomicBool,
    pub(crate) killable: AtomicBool,
    pub(crate) kills: AtomicUsize,
}

impl SwitchTable {
    pub(crate) fn running(killable: bool) -> Arc<Self> {
        let table = Self::default();
        table.running.store(true, Ordering::SeqCst);
        table.killable.store(killable, Ordering::SeqCst);
        Arc::new(table)
    }
}

impl ProcessTable for SwitchTable {
    fn find_by_name(&self, _name: &str) -> Option<u32> {
        self.running.load(Ordering::SeqCst).then_some(4242)
    }

    fn has_window(&self, _pid: u32) -> bool {
        true
    }

    fn kill(&self, _pid: u32) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.killable.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// State store that keeps every save in memory.
#[derive(Clone, Default)]
pub(crate) struct MemoryStore {
    pub(crate) saves: Arc<Mutex<Vec<UpdaterConfig>>>,
}

impl MemoryStore {
    pub(crate) fn last(&self) -> Option<UpdaterConfig> {
        self.saves.lock().unwrap().last().cloned()
    }

    pub(crate) fn count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }
}

impl StateStore for MemoryStore {
    fn save_state(&mut self, state: &UpdaterConfig) -> Result<()> {
        self.saves.lock().unwrap().push(state.clone());
        Ok(())
    }
}
