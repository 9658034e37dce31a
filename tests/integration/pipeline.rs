//! Full update runs against a local release feed.

use serial_test::serial;
use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::helpers::*;
use xxmi_installer::config::{ConfigFile, ConfigStore, LauncherSettings};
use xxmi_installer::events::{Event, EventBus};
use xxmi_installer::feed::GitHubReleases;
use xxmi_installer::orchestrator::{UpdateOptions, UpdateOrchestrator, UpdateOutcome};
use xxmi_installer::package::launcher::{
    launcher_metadata, LauncherTimeouts, LAUNCHER_EXE, LAUNCHER_PACKAGE_NAME,
};
use xxmi_installer::package::{create_installer, LauncherInstaller, Package, PackageKind};
use xxmi_installer::signature::MinisignVerifier;
use xxmi_installer::worker::UpdateWorker;
use xxmi_installer::UpdateError;

fn launcher_package(
    server: &FeedServer,
    install_dir: &Path,
    events: &EventBus,
    table: Arc<LauncherTable>,
) -> Package {
    let settings = LauncherSettings {
        installation_dir: install_dir.to_path_buf(),
        create_shortcut: false,
        instance: "ZZMI".to_string(),
        public_key: FIXTURE_PUBLIC_KEY.to_string(),
    };
    let installer = LauncherInstaller::new(settings).with_timeouts(LauncherTimeouts {
        exit: Duration::from_secs(2),
        kill: Duration::from_millis(50),
        start: Duration::from_secs(2),
    });
    let metadata = launcher_metadata(FIXTURE_PUBLIC_KEY);
    let source = GitHubReleases::new(&metadata.repo_owner, &metadata.repo_name)
        .with_api_base(&server.base_url);
    Package::new(
        metadata,
        Box::new(installer),
        Arc::new(source),
        Arc::new(MinisignVerifier::new(FIXTURE_PUBLIC_KEY)),
        update_context(events, &install_dir.join("Resources/Packages/Launcher"), table),
    )
    .unwrap()
}

fn assets_package(
    server: &FeedServer,
    target_dir: &Path,
    events: &EventBus,
    downloads: &Path,
) -> Package {
    let metadata = assets_metadata();
    let source = GitHubReleases::new(&metadata.repo_owner, &metadata.repo_name)
        .with_api_base(&server.base_url);
    let installer = create_installer(
        &metadata.package_name,
        PackageKind::Archive {
            target_dir: target_dir.to_path_buf(),
        },
    );
    Package::new(
        metadata,
        installer,
        Arc::new(source),
        Arc::new(MinisignVerifier::new(FIXTURE_PUBLIC_KEY)),
        update_context(events, downloads, Arc::new(LauncherTable::default())),
    )
    .unwrap()
}

fn config_file(temp: &TempDir) -> ConfigFile {
    ConfigFile::load(ConfigStore::new(temp.path().join("config.toml"))).unwrap()
}

fn forced() -> UpdateOptions {
    UpdateOptions {
        force: true,
        ..UpdateOptions::default()
    }
}

#[cfg(unix)]
#[test]
#[serial]
fn test_launcher_update_end_to_end() {
    let temp = TempDir::new().unwrap();
    let server = FeedServer::start(vec![FixtureRelease::launcher()]);
    let install_dir = temp.path().join("XXMI Launcher");
    let events = EventBus::new();
    let rx = events.channel();
    let table = LauncherTable::running_on(&events);

    let package = launcher_package(&server, &install_dir, &events, Arc::clone(&table));
    let store = config_file(&temp);
    let config = store.config().packages.clone();
    let orchestrator =
        UpdateOrchestrator::new(vec![package], config, Box::new(store), events.clone()).unwrap();

    let mut worker = UpdateWorker::new(orchestrator);
    let outcome = worker.start(forced()).unwrap().recv().unwrap().unwrap();
    worker.join();

    assert_eq!(
        outcome,
        UpdateOutcome::ExitRequested {
            package: LAUNCHER_PACKAGE_NAME.to_string()
        }
    );
    assert!(table.kills.load(Ordering::SeqCst) >= 1);
    assert!(install_dir.join(LAUNCHER_EXE).is_file());
    assert_eq!(
        fs::read_to_string(install_dir.join("Resources/Bin/launcher.dat")).unwrap(),
        "launcher resources v1.4.2\n"
    );
    assert_eq!(
        fs::read_to_string(install_dir.join(".launcher.version")).unwrap().trim(),
        "1.4.2"
    );

    let names = event_names(&rx);
    assert_eq!(names.first(), Some(&"InitializeDownload"));
    assert_eq!(names.last(), Some(&"CloseApplication"));
    let unpack = names.iter().position(|n| *n == "StartUnpack").unwrap();
    let stop = names.iter().position(|n| *n == "WaitForProcessExit").unwrap();
    let start = names.iter().position(|n| *n == "StartLauncher").unwrap();
    assert!(stop < unpack && unpack < start);
    assert!(!names.contains(&"StartCreateShortcuts"));

    let saved = ConfigStore::new(temp.path().join("config.toml")).load().unwrap();
    let state = &saved.packages.packages[LAUNCHER_PACKAGE_NAME];
    assert_eq!(state.latest_version, "1.4.2");
    assert!(state.update_check_time > 0);
}

#[test]
#[serial]
fn test_tampered_download_is_rejected() {
    let temp = TempDir::new().unwrap();
    let mut release = FixtureRelease::launcher();
    let last = release.asset.len() - 1;
    release.asset[last] ^= 0xff;
    let server = FeedServer::start(vec![release]);
    let install_dir = temp.path().join("XXMI Launcher");
    let events = EventBus::new();
    let table = LauncherTable::running_on(&events);

    let mut package = launcher_package(&server, &install_dir, &events, Arc::clone(&table));
    package.detect_latest_version().unwrap();
    assert_eq!(package.latest_version(), "1.4.2");

    let err = package.update(false).unwrap_err();
    assert!(
        matches!(&err, UpdateError::Integrity { asset } if asset == "Downloaded data"),
        "unexpected error: {err}"
    );
    assert!(package.downloaded_asset_path().is_none());
    assert!(!install_dir.join(LAUNCHER_EXE).exists());
    assert_eq!(table.kills.load(Ordering::SeqCst), 0);
}

#[test]
#[serial]
fn test_archive_package_install_then_throttled_rerun() {
    let temp = TempDir::new().unwrap();
    let server = FeedServer::start(vec![FixtureRelease::assets()]);
    let target = temp.path().join("Assets");
    let downloads = temp.path().join("downloads");
    let events = EventBus::new();

    let package = assets_package(&server, &target, &events, &downloads);
    let store = config_file(&temp);
    let config = store.config().packages.clone();
    let mut orchestrator =
        UpdateOrchestrator::new(vec![package], config, Box::new(store), events.clone()).unwrap();

    let outcome = orchestrator.update_packages(&UpdateOptions::default()).unwrap();
    assert_eq!(outcome, UpdateOutcome::Completed);
    assert_eq!(
        fs::read_to_string(target.join("textures/readme.txt")).unwrap(),
        "asset pack v2.0.0\n"
    );
    assert!(target.join("shaders/base.hlsl").is_file());
    assert_eq!(orchestrator.packages()[0].installed_version(), "2.0.0");
    assert_eq!(server.hits("/releases/latest"), 1);
    assert_eq!(server.hits("/download/Assets-v2.0.0.zip"), 1);

    // Up to date and checked moments ago: no feed traffic at all.
    let rx = events.channel();
    let outcome = orchestrator.update_packages(&UpdateOptions::default()).unwrap();
    assert_eq!(outcome, UpdateOutcome::Completed);
    assert_eq!(server.hits("/releases/latest"), 1);
    assert_eq!(server.hits("/download/Assets-v2.0.0.zip"), 1);
    assert_eq!(event_names(&rx), vec!["VersionNotification"]);
}

#[test]
#[serial]
fn test_cached_state_carries_over_to_next_run() {
    let temp = TempDir::new().unwrap();
    let server = FeedServer::start(vec![FixtureRelease::assets()]);
    let target = temp.path().join("Assets");
    let downloads = temp.path().join("downloads");

    {
        let events = EventBus::new();
        let package = assets_package(&server, &target, &events, &downloads);
        let store = config_file(&temp);
        let config = store.config().packages.clone();
        let mut orchestrator =
            UpdateOrchestrator::new(vec![package], config, Box::new(store), events).unwrap();
        let check_only = UpdateOptions {
            no_install: true,
            ..UpdateOptions::default()
        };
        orchestrator.update_packages(&check_only).unwrap();
        assert!(orchestrator.update_available());
    }
    assert!(!target.join("textures/readme.txt").exists());

    let events = EventBus::new();
    let rx = events.channel();
    let package = assets_package(&server, &target, &events, &downloads);
    let store = config_file(&temp);
    let config = store.config().packages.clone();
    assert_eq!(config.packages["Assets"].latest_version, "2.0.0");

    let orchestrator =
        UpdateOrchestrator::new(vec![package], config, Box::new(store), events).unwrap();
    assert!(orchestrator.update_available());
    match orchestrator.version_notification() {
        Event::VersionNotification { package_states, .. } => {
            let assets = &package_states["Assets"];
            assert_eq!(assets.installed_version, "");
            assert_eq!(assets.latest_version, "2.0.0");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(server.hits("/releases/latest"), 1);
}
