//! Shared fixtures for the update pipeline integration tests

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use xxmi_installer::events::{Event, EventBus, EventRecord};
use xxmi_installer::package::{PackageMetadata, UpdateContext};
use xxmi_installer::process::{ProcessTable, ProcessWaiter};

/// Minisign key the fixture archives are signed with.
pub const FIXTURE_PUBLIC_KEY: &str = "RWShssPU5fYHGCmsuuFBvMrwsi4alNNNC8c2HlJtC/4SyJeUvJMilm3X";

pub const LAUNCHER_ZIP: &[u8] = include_bytes!("../fixtures/XXMI-LAUNCHER-PACKAGE-v1.4.2.zip");
pub const LAUNCHER_SIG: &str = include_str!("../fixtures/XXMI-LAUNCHER-PACKAGE-v1.4.2.zip.minisig");
pub const ASSETS_ZIP: &[u8] = include_bytes!("../fixtures/Assets-v2.0.0.zip");
pub const ASSETS_SIG: &str = include_str!("../fixtures/Assets-v2.0.0.zip.minisig");

/// One release served by [`FeedServer`].
pub struct FixtureRelease {
    pub repo: String,
    pub name: String,
    pub tag: String,
    pub asset_name: String,
    pub asset: Vec<u8>,
    pub signature: String,
}

impl FixtureRelease {
    pub fn launcher() -> Self {
        Self {
            repo: "SpectrumQT/XXMI-Launcher".to_string(),
            name: "XXMI Launcher v1.4.2".to_string(),
            tag: "v1.4.2".to_string(),
            asset_name: "XXMI-LAUNCHER-PACKAGE-v1.4.2.zip".to_string(),
            asset: LAUNCHER_ZIP.to_vec(),
            signature: LAUNCHER_SIG.to_string(),
        }
    }

    pub fn assets() -> Self {
        Self {
            repo: "SpectrumQT/XXMI-Assets".to_string(),
            name: "Assets 2.0.0".to_string(),
            tag: "v2.0.0".to_string(),
            asset_name: "Assets-v2.0.0.zip".to_string(),
            asset: ASSETS_ZIP.to_vec(),
            signature: ASSETS_SIG.to_string(),
        }
    }

    fn release_json(&self, base_url: &str) -> String {
        let body = format!(
            "## Changes\n- Fixes\n\n## Signature\n```minisign\n{}```\n",
            self.signature
        );
        serde_json::json!({
            "name": self.name,
            "tag_name": self.tag,
            "body": body,
            "assets": [
                {
                    "name": "unrelated.txt",
                    "browser_download_url": format!("{base_url}/download/unrelated.txt"),
                },
                {
                    "name": self.asset_name,
                    "browser_download_url": format!("{base_url}/download/{}", self.asset_name),
                },
            ],
        })
        .to_string()
    }
}

/// Minimal HTTP server standing in for the GitHub API and asset CDN.
pub struct FeedServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FeedServer {
    pub fn start(releases: Vec<FixtureRelease>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind feed server");
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let mut routes: HashMap<String, (&'static str, Vec<u8>)> = HashMap::new();
        for release in releases {
            routes.insert(
                format!("/repos/{}/releases/latest", release.repo),
                ("application/json", release.release_json(&base_url).into_bytes()),
            );
            routes.insert(
                format!("/download/{}", release.asset_name),
                ("application/zip", release.asset.clone()),
            );
        }

        let log = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let _ = serve(stream, &routes, &log);
            }
        });

        Self { base_url, requests }
    }

    pub fn hits(&self, path_suffix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.ends_with(path_suffix))
            .count()
    }
}

fn serve(
    mut stream: TcpStream,
    routes: &HashMap<String, (&'static str, Vec<u8>)>,
    log: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();
    log.lock().unwrap().push(path.clone());

    let (status, content_type, body) = match routes.get(&path) {
        Some((content_type, body)) => ("200 OK", *content_type, body.as_slice()),
        None => ("404 Not Found", "text/plain", b"not found".as_slice()),
    };
    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    stream.write_all(body)?;
    stream.flush()
}

/// Process table where the launcher runs until killed and reappears when
/// the installer starts waiting for it.
#[derive(Default)]
pub struct LauncherTable {
    pub running: AtomicBool,
    pub kills: AtomicUsize,
}

impl ProcessTable for LauncherTable {
    fn find_by_name(&self, _name: &str) -> Option<u32> {
        self.running.load(Ordering::SeqCst).then_some(31337)
    }

    fn has_window(&self, _pid: u32) -> bool {
        true
    }

    fn kill(&self, _pid: u32) -> anyhow::Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl LauncherTable {
    pub fn running_on(events: &EventBus) -> Arc<Self> {
        let table = Arc::new(Self::default());
        table.running.store(true, Ordering::SeqCst);
        let watcher = Arc::clone(&table);
        events.subscribe(move |record| {
            if matches!(record.event, Event::WaitForProcess { .. }) {
                watcher.running.store(true, Ordering::SeqCst);
            }
        });
        table
    }
}

pub fn update_context(
    events: &EventBus,
    downloads: &Path,
    table: Arc<dyn ProcessTable>,
) -> UpdateContext {
    UpdateContext::new(events.clone(), downloads).with_waiter(
        ProcessWaiter::with_table(table).with_poll_interval(Duration::from_millis(5)),
    )
}

pub fn assets_metadata() -> PackageMetadata {
    PackageMetadata {
        package_name: "Assets".to_string(),
        repo_owner: "SpectrumQT".to_string(),
        repo_name: "XXMI-Assets".to_string(),
        asset_version_pattern: r"(\d+\.\d+\.\d+)".to_string(),
        asset_name_format: "Assets-v{version}.zip".to_string(),
        signature_pattern: xxmi_installer::package::launcher::SIGNATURE_PATTERN.to_string(),
        signature_public_key: FIXTURE_PUBLIC_KEY.to_string(),
        exit_after_update: false,
    }
}

/// Event names in publish order, download progress left out.
pub fn event_names(records: &std::sync::mpsc::Receiver<EventRecord>) -> Vec<&'static str> {
    records
        .try_iter()
        .map(|r| r.event)
        .filter(|e| !matches!(e, Event::UpdateDownloadProgress { .. }))
        .map(|e| e.name())
        .collect()
}
