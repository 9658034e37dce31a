//! Events emitted by the update engine and the bus that carries them.
//!
//! The bus is an explicit value handed to every component at construction.
//! Observers either register a callback or take an `mpsc` receiver; both see
//! every event in publish order with a per-bus sequence number.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Version information for one package, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageVersions {
    pub installed_version: String,
    pub latest_version: String,
    pub skipped_version: String,
}

/// Discrete occurrences reported outward during an update run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Ready,
    StatusUpdate {
        status: String,
    },
    CloseApplication {
        delay_ms: u64,
    },
    VersionNotification {
        auto_update: bool,
        package_states: BTreeMap<String, PackageVersions>,
    },
    InitializeDownload,
    StartDownload {
        asset_name: String,
    },
    UpdateDownloadProgress {
        downloaded_bytes: u64,
        total_bytes: u64,
    },
    StartIntegrityVerification {
        asset_name: String,
    },
    StartFileWrite {
        asset_name: String,
    },
    StartFileMove {
        asset_name: String,
    },
    InitializeInstallation,
    StartUnpack {
        asset_name: String,
    },
    WaitForProcess {
        process_name: String,
    },
    WaitForProcessExit {
        process_name: String,
    },
    StartCreateShortcuts,
    StartLauncher {
        asset_name: String,
    },
}

impl Event {
    /// Short event name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Event::Ready => "Ready",
            Event::StatusUpdate { .. } => "StatusUpdate",
            Event::CloseApplication { .. } => "CloseApplication",
            Event::VersionNotification { .. } => "VersionNotification",
            Event::InitializeDownload => "InitializeDownload",
            Event::StartDownload { .. } => "StartDownload",
            Event::UpdateDownloadProgress { .. } => "UpdateDownloadProgress",
            Event::StartIntegrityVerification { .. } => "StartIntegrityVerification",
            Event::StartFileWrite { .. } => "StartFileWrite",
            Event::StartFileMove { .. } => "StartFileMove",
            Event::InitializeInstallation => "InitializeInstallation",
            Event::StartUnpack { .. } => "StartUnpack",
            Event::WaitForProcess { .. } => "WaitForProcess",
            Event::WaitForProcessExit { .. } => "WaitForProcessExit",
            Event::StartCreateShortcuts => "StartCreateShortcuts",
            Event::StartLauncher { .. } => "StartLauncher",
        }
    }
}

/// An event together with its position and publish time.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: Event,
}

type Callback = Box<dyn Fn(&EventRecord) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    callbacks: Vec<Callback>,
    channels: Vec<mpsc::Sender<EventRecord>>,
}

/// Publish/subscribe hub owned by whoever builds the update engine.
///
/// Cloning is cheap; clones share subscribers and the sequence counter.
#[derive(Clone, Default)]
pub struct EventBus {
    seq: Arc<AtomicU64>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback invoked synchronously on the publishing thread.
    ///
    /// Callbacks run on the download hot path and must not block or publish.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.subscribers().callbacks.push(Box::new(callback));
    }

    /// Open a receiver that observes every event published after this call.
    pub fn channel(&self) -> mpsc::Receiver<EventRecord> {
        let (tx, rx) = mpsc::channel();
        self.subscribers().channels.push(tx);
        rx
    }

    pub fn publish(&self, event: Event) {
        if !matches!(event, Event::UpdateDownloadProgress { .. }) {
            tracing::debug!(event = event.name(), "fired: {event:?}");
        }

        let record = EventRecord {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            at: Utc::now(),
            event,
        };

        let mut subs = self.subscribers();
        for callback in &subs.callbacks {
            callback(&record);
        }
        subs.channels.retain(|tx| tx.send(record.clone()).is_ok());
    }

    /// Subscriber list; a callback that panicked mid-publish does not silence the bus.
    fn subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("event subscriber panicked during an earlier publish");
            PoisonError::into_inner(poisoned)
        })
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
