//! Console rendering of engine events.

use colored::Colorize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::events::{Event, EventBus};

/// Print every event on stdout; download progress in 10% steps.
pub fn attach_console(events: &EventBus) {
    let last_step = Arc::new(AtomicU64::new(u64::MAX));
    events.subscribe(move |record| {
        if let Some(line) = describe(&record.event, &last_step) {
            println!("{line}");
        }
    });
}

fn progress_step(downloaded: u64, total: u64) -> Option<u64> {
    (total > 0).then(|| downloaded.saturating_mul(10) / total)
}

/// One console line for `event`, or `None` when it should stay quiet.
fn describe(event: &Event, last_step: &AtomicU64) -> Option<String> {
    let line = match event {
        Event::Ready => format!("{}", "Ready".green()),
        Event::StatusUpdate { status } => status.clone(),
        Event::CloseApplication { .. } => {
            format!("{} Update finished, closing", "✓".green().bold())
        }
        Event::VersionNotification { package_states, .. } => package_states
            .iter()
            .map(|(name, v)| {
                let installed = if v.installed_version.is_empty() {
                    "not installed".dimmed().to_string()
                } else {
                    v.installed_version.clone()
                };
                let latest = if v.latest_version.is_empty() {
                    "unknown".dimmed().to_string()
                } else {
                    v.latest_version.green().to_string()
                };
                format!("{} {name}: {installed} (latest: {latest})", "•".blue())
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Event::InitializeDownload => {
            last_step.store(u64::MAX, Ordering::Relaxed);
            format!("{}", "Initializing download...".blue())
        }
        Event::StartDownload { asset_name } => format!("Downloading {}...", asset_name.bold()),
        Event::UpdateDownloadProgress {
            downloaded_bytes,
            total_bytes,
        } => {
            let step = progress_step(*downloaded_bytes, *total_bytes)?;
            if last_step.swap(step, Ordering::Relaxed) == step {
                return None;
            }
            format!("  {}% ({downloaded_bytes}/{total_bytes} bytes)", step * 10)
        }
        Event::StartIntegrityVerification { asset_name } => {
            format!("Verifying integrity of {asset_name}...")
        }
        Event::StartFileWrite { asset_name } => format!("Writing {asset_name}..."),
        Event::StartFileMove { asset_name } => format!("Moving {asset_name}..."),
        Event::InitializeInstallation => format!("{}", "Initializing installation...".blue()),
        Event::StartUnpack { asset_name } => format!("Unpacking {asset_name}..."),
        Event::WaitForProcess { process_name } => format!("Waiting for {process_name} to start..."),
        Event::WaitForProcessExit { process_name } => {
            format!("Waiting for {process_name} to exit...")
        }
        Event::StartCreateShortcuts => "Creating shortcuts...".to_string(),
        Event::StartLauncher { asset_name } => format!("Starting {asset_name}..."),
    };
    Some(line)
}
