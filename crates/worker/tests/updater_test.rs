mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fleet_core::FleetResult;
use fleet_domain::value_objects::SemanticVersion;
use fleet_worker::{ProcessRelauncher, UpdateOutcome, Updater};

use common::StubCoordinator;

#[derive(Default)]
struct RecordingRelauncher {
    launched: Mutex<Vec<PathBuf>>,
}

impl ProcessRelauncher for RecordingRelauncher {
    fn relaunch(&self, executable: &Path) -> FleetResult<()> {
        self.launched.lock().unwrap().push(executable.to_path_buf());
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    install_path: PathBuf,
    api: Arc<StubCoordinator>,
    relauncher: Arc<RecordingRelauncher>,
    updater: Updater,
}

fn fixture(local_version: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let install_path = dir.path().join("fleet-agent");
    std::fs::write(&install_path, b"old-binary").unwrap();

    let api = StubCoordinator::new();
    let relauncher = Arc::new(RecordingRelauncher::default());
    let updater = Updater::new(
        api.clone(),
        local_version.parse::<SemanticVersion>().unwrap(),
        install_path.clone(),
        relauncher.clone(),
    );

    Fixture {
        _dir: dir,
        install_path,
        api,
        relauncher,
        updater,
    }
}

#[tokio::test]
async fn test_newer_server_version_replaces_and_relaunches() {
    let f = fixture("1.0.2");
    f.api.publish("1.0.3", b"new-binary");

    let outcome = f.updater.check_and_update().await.unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            from: SemanticVersion::new(1, 0, 2),
            to: SemanticVersion::new(1, 0, 3),
        }
    );

    assert_eq!(std::fs::read(&f.install_path).unwrap(), b"new-binary");
    assert_eq!(std::fs::read(f.updater.backup_path()).unwrap(), b"old-binary");
    assert_eq!(
        f.relauncher.launched.lock().unwrap().as_slice(),
        &[f.install_path.clone()]
    );
}

#[tokio::test]
async fn test_equal_or_older_server_version_is_noop() {
    for server in ["1.0.2", "1.0.1", "0.9.9"] {
        let f = fixture("1.0.2");
        f.api.publish(server, b"new-binary");

        let outcome = f.updater.check_and_update().await.unwrap();
        assert!(matches!(outcome, UpdateOutcome::UpToDate { .. }));
        assert_eq!(std::fs::read(&f.install_path).unwrap(), b"old-binary");
        assert!(!f.updater.backup_path().exists());
        assert!(f.relauncher.launched.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_no_published_version() {
    let f = fixture("1.0.0");
    let outcome = f.updater.check_and_update().await.unwrap();
    assert_eq!(
        outcome,
        UpdateOutcome::UpToDate {
            local: SemanticVersion::new(1, 0, 0),
            remote: None,
        }
    );
}

#[tokio::test]
async fn test_download_failure_keeps_current_file() {
    let f = fixture("1.0.2");
    f.api.publish("2.0.0", b"new-binary");
    f.api.payload.lock().unwrap().clear();

    assert!(f.updater.check_and_update().await.is_err());
    assert_eq!(std::fs::read(&f.install_path).unwrap(), b"old-binary");
    assert!(f.relauncher.launched.lock().unwrap().is_empty());
}
