use async_trait::async_trait;
use reqloader::{
    FetchError, InstallError, Installer, LoaderError, LoaderState, ProcessRestarter,
    RequirementLoader, RestartError, Transport, TransportResponse, UpdateOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Install { path: PathBuf, content: String, silent: bool },
    Restart,
}

/// Records installs and restarts in the order they happen.
#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_install_with: Option<i32>,
    // Fails only the nth install (1-based)
    fail_install_number: Option<usize>,
}

impl Recorder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn installs(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Install { .. }))
            .count()
    }

    fn restarts(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Restart).count()
    }
}

#[async_trait]
impl Installer for Recorder {
    async fn install(&self, manifest_path: &Path, silent: bool) -> Result<(), InstallError> {
        let content = std::fs::read_to_string(manifest_path).unwrap_or_default();
        let number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call::Install {
                path: manifest_path.to_path_buf(),
                content,
                silent,
            });
            calls.iter().filter(|c| matches!(c, Call::Install { .. })).count()
        };
        if self.fail_install_number == Some(number) {
            return Err(InstallError::Failed { exit_code: Some(1) });
        }
        match self.fail_install_with {
            Some(code) => Err(InstallError::Failed {
                exit_code: Some(code),
            }),
            None => Ok(()),
        }
    }
}

impl ProcessRestarter for Recorder {
    fn restart(&self) -> Result<(), RestartError> {
        self.calls.lock().unwrap().push(Call::Restart);
        Ok(())
    }
}

/// Serves a fixed body and counts requests.
#[derive(Clone)]
struct ScriptedTransport {
    status: u16,
    body: Arc<Mutex<String>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            body: Arc::new(Mutex::new(body.to_string())),
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> anyhow::Result<TransportResponse> {
        self.urls.lock().unwrap().push(url.to_string());
        Ok(TransportResponse {
            status: self.status,
            body: self.body.lock().unwrap().clone(),
        })
    }
}

struct Fixture {
    _dir: TempDir,
    source: PathBuf,
    snapshot: PathBuf,
}

impl Fixture {
    fn new(initial: &str) -> Self {
        let dir = tempdir().expect("Failed to create temp dir");
        let source = dir.path().join("upstream.txt");
        let snapshot = dir.path().join("state").join("requirements.txt");
        std::fs::write(&source, initial).unwrap();
        Self {
            _dir: dir,
            source,
            snapshot,
        }
    }

    fn locator(&self) -> String {
        format!("file://{}", self.source.display())
    }

    /// Replace the upstream file atomically so a poll never sees a partial write.
    fn publish(&self, content: &str) {
        let staging = self.source.with_extension("staging");
        std::fs::write(&staging, content).unwrap();
        std::fs::rename(&staging, &self.source).unwrap();
    }

    fn snapshot_content(&self) -> String {
        std::fs::read_to_string(&self.snapshot).unwrap()
    }
}

async fn manual_loader(fixture: &Fixture, recorder: &Recorder, at_startup: bool) -> RequirementLoader {
    RequirementLoader::builder(fixture.locator())
        .snapshot_path(&fixture.snapshot)
        .update_at_startup(at_startup)
        .auto_reload(false)
        .installer(recorder.clone())
        .restarter(recorder.clone())
        .start()
        .await
        .expect("loader should start")
}

#[tokio::test]
async fn test_startup_installs_local_manifest() {
    let fixture = Fixture::new("requests==2.25.0");
    let recorder = Recorder::default();

    let loader = manual_loader(&fixture, &recorder, true).await;

    assert_eq!(loader.state(), LoaderState::ManualReady);
    assert_eq!(
        recorder.calls(),
        vec![Call::Install {
            path: fixture.snapshot.clone(),
            content: "requests==2.25.0".to_string(),
            silent: false,
        }]
    );
    assert_eq!(fixture.snapshot_content(), "requests==2.25.0");
}

#[tokio::test]
async fn test_manual_update_after_upstream_change() {
    let fixture = Fixture::new("requests==2.25.0");
    let recorder = Recorder::default();
    let loader = manual_loader(&fixture, &recorder, true).await;

    fixture.publish("requests==2.26.0");
    let outcome = loader.trigger_update(false).await.unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome {
            changed: true,
            installed: true,
            restart_requested: false,
        }
    );
    assert_eq!(recorder.installs(), 2);
    assert_eq!(recorder.restarts(), 0);
    assert_eq!(fixture.snapshot_content(), "requests==2.26.0");
    match recorder.calls().last() {
        Some(Call::Install { content, .. }) => assert_eq!(content, "requests==2.26.0"),
        other => panic!("unexpected last call: {:?}", other),
    }
}

#[tokio::test]
async fn test_manual_update_always_installs() {
    let fixture = Fixture::new("flask==3.0.0\n");
    let recorder = Recorder::default();
    let loader = manual_loader(&fixture, &recorder, true).await;

    let outcome = loader.trigger_update(false).await.unwrap();
    assert!(!outcome.changed);
    assert!(outcome.installed);
    assert_eq!(recorder.installs(), 2);
}

#[tokio::test]
async fn test_restart_follows_install() {
    let fixture = Fixture::new("requests==2.25.0");
    let recorder = Recorder::default();
    let loader = manual_loader(&fixture, &recorder, false).await;
    assert!(recorder.calls().is_empty());

    let outcome = loader.trigger_update(true).await.unwrap();
    assert!(outcome.restart_requested);

    let calls = recorder.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], Call::Install { .. }));
    assert_eq!(calls[1], Call::Restart);
}

#[tokio::test]
async fn test_failed_install_skips_restart() {
    let fixture = Fixture::new("requests==2.25.0");
    let recorder = Recorder {
        fail_install_with: Some(1),
        ..Recorder::default()
    };
    let loader = manual_loader(&fixture, &recorder, false).await;

    let err = loader.trigger_update(true).await.unwrap_err();
    match err {
        LoaderError::Install(e) => assert_eq!(e.exit_code(), Some(1)),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(recorder.restarts(), 0);
    // The snapshot was still persisted before the install ran
    assert_eq!(fixture.snapshot_content(), "requests==2.25.0");
}

#[tokio::test]
async fn test_manual_trigger_conflicts_with_auto_reload() {
    let fixture = Fixture::new("requests==2.25.0");
    let recorder = Recorder::default();
    let loader = RequirementLoader::builder(fixture.locator())
        .snapshot_path(&fixture.snapshot)
        .update_at_startup(false)
        .poll_interval(Duration::from_secs(3600))
        .installer(recorder.clone())
        .restarter(recorder.clone())
        .start()
        .await
        .unwrap();

    assert_eq!(loader.state(), LoaderState::AutoPolling);
    let err = loader.trigger_update(false).await.unwrap_err();
    assert!(matches!(err, LoaderError::Conflict));
    assert!(err.is_misuse());
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_suspended_loader_still_conflicts() {
    let fixture = Fixture::new("requests==2.25.0");
    let recorder = Recorder::default();
    let loader = RequirementLoader::builder(fixture.locator())
        .snapshot_path(&fixture.snapshot)
        .update_at_startup(false)
        .installer(recorder.clone())
        .restarter(recorder.clone())
        .suspend_polling()
        .start()
        .await
        .unwrap();

    assert_eq!(loader.state(), LoaderState::Idle);
    assert!(matches!(
        loader.trigger_update(false).await,
        Err(LoaderError::Conflict)
    ));

    loader.resume_polling().unwrap();
    assert_eq!(loader.state(), LoaderState::AutoPolling);
}

#[tokio::test]
async fn test_background_polling_installs_on_change_only() {
    let fixture = Fixture::new("requests==2.25.0");
    let recorder = Recorder::default();
    let loader = RequirementLoader::builder(fixture.locator())
        .snapshot_path(&fixture.snapshot)
        .poll_interval(Duration::from_millis(50))
        .silent_mode(true)
        .installer(recorder.clone())
        .restarter(recorder.clone())
        .start()
        .await
        .unwrap();

    // Startup cycle installs once; unchanged polls add nothing
    assert_eq!(recorder.installs(), 1);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(recorder.installs(), 1);
    assert_eq!(recorder.restarts(), 0);

    fixture.publish("requests==2.26.0");
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if recorder.restarts() > 0 {
            break;
        }
    }

    let calls = recorder.calls();
    assert_eq!(calls.len(), 3, "calls: {:?}", calls);
    assert_eq!(
        calls[1],
        Call::Install {
            path: fixture.snapshot.clone(),
            content: "requests==2.26.0".to_string(),
            silent: true,
        }
    );
    assert_eq!(calls[2], Call::Restart);
    assert_eq!(fixture.snapshot_content(), "requests==2.26.0");
    drop(loader);
}

#[tokio::test]
async fn test_background_errors_do_not_stop_polling() {
    let fixture = Fixture::new("requests==2.25.0");
    let recorder = Recorder::default();
    let _loader = RequirementLoader::builder(fixture.locator())
        .snapshot_path(&fixture.snapshot)
        .poll_interval(Duration::from_millis(50))
        .installer(recorder.clone())
        .restarter(recorder.clone())
        .start()
        .await
        .unwrap();

    // Source disappears for a few ticks, then comes back changed
    std::fs::remove_file(&fixture.source).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    fixture.publish("requests==2.27.0");

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if recorder.restarts() > 0 {
            break;
        }
    }
    assert_eq!(recorder.installs(), 2);
    assert_eq!(recorder.restarts(), 1);
}

#[tokio::test]
async fn test_failed_background_install_is_retried() {
    let fixture = Fixture::new("requests==2.25.0");
    let recorder = Recorder {
        fail_install_number: Some(2),
        ..Recorder::default()
    };
    let _loader = RequirementLoader::builder(fixture.locator())
        .snapshot_path(&fixture.snapshot)
        .poll_interval(Duration::from_millis(50))
        .installer(recorder.clone())
        .restarter(recorder.clone())
        .start()
        .await
        .unwrap();
    assert_eq!(recorder.installs(), 1);

    fixture.publish("requests==2.26.0");
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if recorder.restarts() > 0 {
            break;
        }
    }

    // The second install failed; a later tick installs the same manifest again
    let calls = recorder.calls();
    assert_eq!(recorder.installs(), 3, "calls: {:?}", calls);
    assert_eq!(recorder.restarts(), 1);
    match &calls[2] {
        Call::Install { content, .. } => assert_eq!(content, "requests==2.26.0"),
        other => panic!("unexpected call: {:?}", other),
    }
    assert_eq!(calls[3], Call::Restart);

    // Once it succeeded, unchanged ticks stop installing
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(recorder.installs(), 3);
}

#[tokio::test]
async fn test_startup_errors_propagate() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::default();
    let err = RequirementLoader::builder(dir.path().join("missing.txt").to_string_lossy())
        .snapshot_path(dir.path().join("requirements.txt"))
        .auto_reload(false)
        .installer(recorder.clone())
        .restarter(recorder.clone())
        .start()
        .await
        .unwrap_err();

    assert!(matches!(err, LoaderError::Fetch(FetchError::NotFound { .. })));
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_remote_blob_locator_is_fetched_raw() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::default();
    let transport = ScriptedTransport::new(200, "numpy==2.0.0\n");

    let loader = RequirementLoader::builder("https://github.com/owner/app/blob/main/requirements.txt")
        .snapshot_path(dir.path().join("requirements.txt"))
        .auto_reload(false)
        .transport(transport.clone())
        .installer(recorder.clone())
        .restarter(recorder.clone())
        .start()
        .await
        .unwrap();

    assert_eq!(
        transport.urls.lock().unwrap().as_slice(),
        ["https://raw.githubusercontent.com/owner/app/main/requirements.txt"]
    );
    let snapshot = loader.snapshot().await.unwrap().expect("startup cycle ran");
    assert_eq!(snapshot.content, "numpy==2.0.0\n");
    assert_eq!(recorder.installs(), 1);
}

#[tokio::test]
async fn test_per_call_transport_and_bad_status() {
    let dir = tempdir().unwrap();
    let recorder = Recorder::default();
    let loader = RequirementLoader::builder("https://example.com/requirements.txt")
        .snapshot_path(dir.path().join("requirements.txt"))
        .update_at_startup(false)
        .auto_reload(false)
        .transport(ScriptedTransport::new(200, "unused"))
        .installer(recorder.clone())
        .restarter(recorder.clone())
        .start()
        .await
        .unwrap();

    let denied = ScriptedTransport::new(403, "forbidden");
    let err = loader.trigger_update_with(false, &denied).await.unwrap_err();
    assert!(matches!(
        err,
        LoaderError::Fetch(FetchError::BadStatus { status: 403, .. })
    ));
    assert_eq!(denied.urls.lock().unwrap().len(), 1);
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn test_fetch_only_does_not_persist() {
    let fixture = Fixture::new("requests==2.25.0");
    let recorder = Recorder::default();
    let loader = manual_loader(&fixture, &recorder, true).await;

    fixture.publish("requests==2.26.0");
    let report = loader.fetch_only().await.unwrap();
    assert!(report.changed);
    assert_eq!(report.content, "requests==2.26.0");
    assert!(report.plan.is_local());
    assert_eq!(fixture.snapshot_content(), "requests==2.25.0");
    assert_eq!(recorder.installs(), 1);

    // Works in automatic mode as well
    let auto = RequirementLoader::builder(fixture.locator())
        .snapshot_path(&fixture.snapshot)
        .update_at_startup(false)
        .installer(recorder.clone())
        .restarter(recorder.clone())
        .suspend_polling()
        .start()
        .await
        .unwrap();
    assert!(auto.fetch_only().await.unwrap().changed);
}

/// Installer that calls back into its own loader.
struct ReentrantInstaller {
    loader: Arc<Mutex<Option<Arc<RequirementLoader>>>>,
    observed: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl Installer for ReentrantInstaller {
    async fn install(&self, _manifest_path: &Path, _silent: bool) -> Result<(), InstallError> {
        let loader = self.loader.lock().unwrap().clone();
        if let Some(loader) = loader {
            let result = loader.trigger_update(false).await;
            *self.observed.lock().unwrap() = result.err().map(|e| e.to_string());
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_reentrant_trigger_is_restricted() {
    let fixture = Fixture::new("requests==2.25.0");
    let slot = Arc::new(Mutex::new(None));
    let observed = Arc::new(Mutex::new(None));
    let installer = ReentrantInstaller {
        loader: slot.clone(),
        observed: observed.clone(),
    };

    let loader = Arc::new(
        RequirementLoader::builder(fixture.locator())
            .snapshot_path(&fixture.snapshot)
            .update_at_startup(false)
            .auto_reload(false)
            .installer(installer)
            .restarter(Recorder::default())
            .start()
            .await
            .unwrap(),
    );
    *slot.lock().unwrap() = Some(loader.clone());

    loader.trigger_update(false).await.unwrap();
    let message = observed.lock().unwrap().clone().expect("nested call should fail");
    assert!(message.contains("trigger_update"));

    // Break the reference cycle
    slot.lock().unwrap().take();
}
