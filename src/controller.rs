//! Update controller
//!
//! A [`RequirementLoader`] owns the loader configuration and the current
//! manifest snapshot, and drives the cycle
//! fetch → detect/persist → install → (optional) restart.
//!
//! The mode is fixed when the loader is built:
//!
//! - [`Mode::Automatic`]: a background task sleeps for the poll interval, runs
//!   a cycle, and repeats. It only installs when the manifest changed, and
//!   restarts the process after a successful install. Errors are logged and
//!   the loop carries on at the next tick; an install that failed is retried
//!   by the next cycle even if the manifest has not changed since. Manual triggering is rejected with
//!   [`LoaderError::Conflict`].
//! - [`Mode::Manual`]: cycles run when the caller asks for one, and every
//!   manual cycle reinstalls whether or not the manifest changed.
//!
//! With `update_at_startup`, one forced cycle runs before the builder returns,
//! in either mode, and never restarts.
//!
//! Cycles on one loader never overlap. Several loaders pointed at the same
//! snapshot path do not coordinate with each other; callers sharing a path
//! must serialize those loaders themselves.

use crate::detect::ChangeDetector;
use crate::error::LoaderError;
use crate::fetch::{self, ReqwestTransport, Transport};
use crate::install::{CommandInstaller, Installer};
use crate::restart::{ExecRestarter, ProcessRestarter};
use crate::source::{self, FetchPlan};
use crate::types::{LoaderConfig, LoaderState, ManifestSnapshot, Mode, UpdateOutcome};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

tokio::task_local! {
    static IN_CYCLE: ();
}

/// What started a cycle. Only `Manual` can be requested from outside the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleTrigger {
    Startup,
    Poll,
    Manual { request_restart: bool },
}

impl CycleTrigger {
    fn forces_install(self) -> bool {
        !matches!(self, CycleTrigger::Poll)
    }

    fn requests_restart(self) -> bool {
        match self {
            CycleTrigger::Startup => false,
            CycleTrigger::Poll => true,
            CycleTrigger::Manual { request_restart } => request_restart,
        }
    }
}

/// Result of [`RequirementLoader::fetch_only`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub plan: FetchPlan,
    pub content: String,
    pub changed: bool,
}

struct Inner {
    config: LoaderConfig,
    detector: ChangeDetector,
    transport: Arc<dyn Transport>,
    installer: Arc<dyn Installer>,
    restarter: Arc<dyn ProcessRestarter>,
    // Held for the whole cycle, which keeps cycles from overlapping
    snapshot: tokio::sync::Mutex<Option<ManifestSnapshot>>,
    // Set when an install failed after its manifest was already persisted
    pending_install: AtomicBool,
}

impl Inner {
    async fn run_cycle(
        &self,
        trigger: CycleTrigger,
        transport: &dyn Transport,
    ) -> Result<UpdateOutcome, LoaderError> {
        IN_CYCLE.scope((), self.cycle(trigger, transport)).await
    }

    async fn cycle(
        &self,
        trigger: CycleTrigger,
        transport: &dyn Transport,
    ) -> Result<UpdateOutcome, LoaderError> {
        let mut current = self.snapshot.lock().await;
        tracing::debug!("Starting {:?} update cycle", trigger);

        let plan = source::resolve(&self.config.locator);
        let content = fetch::fetch(&plan, transport).await?;
        let changed = self.detector.detect_and_persist(&content).await?;
        let retry = self.pending_install.load(Ordering::SeqCst);
        let forced = trigger.forces_install() || retry;
        if retry && !changed {
            tracing::debug!("Retrying install that failed in an earlier cycle");
        }

        if !changed && !forced {
            tracing::debug!("No manifest change detected, skipping install");
            *current = Some(self.snapshot_of(content));
            return Ok(UpdateOutcome::default());
        }
        if !changed {
            self.detector.ensure_exists(&content).await?;
        }
        *current = Some(self.snapshot_of(content));

        if let Err(e) = self
            .installer
            .install(self.detector.path(), self.config.silent_mode)
            .await
        {
            self.pending_install.store(true, Ordering::SeqCst);
            return Err(e.into());
        }
        self.pending_install.store(false, Ordering::SeqCst);

        let mut outcome = UpdateOutcome {
            changed,
            installed: true,
            restart_requested: false,
        };

        if trigger.requests_restart() {
            outcome.restart_requested = true;
            if let Err(e) = self.restarter.restart() {
                tracing::error!("{}. Dependency state is undefined, exiting.", e);
                std::process::exit(1);
            }
        }

        Ok(outcome)
    }

    fn snapshot_of(&self, content: String) -> ManifestSnapshot {
        ManifestSnapshot {
            content,
            path: self.detector.path().to_path_buf(),
            fetched_at: Utc::now(),
        }
    }

    async fn inspect(&self, transport: &dyn Transport) -> Result<FetchReport, LoaderError> {
        let _current = self.snapshot.lock().await;
        let plan = source::resolve(&self.config.locator);
        let content = fetch::fetch(&plan, transport).await?;
        let changed = self.detector.differs(&content).await?;
        Ok(FetchReport {
            plan,
            content,
            changed,
        })
    }
}

fn spawn_poller(inner: Arc<Inner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = inner.config.poll_interval;
        tracing::info!("Polling {} every {:?}", inner.config.locator, interval);
        loop {
            tokio::time::sleep(interval).await;
            match inner
                .run_cycle(CycleTrigger::Poll, inner.transport.as_ref())
                .await
            {
                Ok(outcome) if outcome.installed => {
                    tracing::info!("Background update installed new dependencies")
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    "Background update failed: {}. Retrying in {:?}",
                    e,
                    interval
                ),
            }
        }
    })
}

fn ensure_outside_cycle(operation: &'static str) -> Result<(), LoaderError> {
    if IN_CYCLE.try_with(|_| ()).is_ok() {
        return Err(LoaderError::RestrictedOperation(operation));
    }
    Ok(())
}

/// Builder for [`RequirementLoader`].
pub struct LoaderBuilder {
    config: LoaderConfig,
    transport: Option<Arc<dyn Transport>>,
    installer: Option<Arc<dyn Installer>>,
    restarter: Option<Arc<dyn ProcessRestarter>>,
    suspended: bool,
}

impl LoaderBuilder {
    pub fn new(locator: impl Into<String>) -> Self {
        Self::from_config(LoaderConfig::new(locator))
    }

    pub fn from_config(config: LoaderConfig) -> Self {
        Self {
            config,
            transport: None,
            installer: None,
            restarter: None,
            suspended: false,
        }
    }

    pub fn snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.snapshot_path = path.into();
        self
    }

    pub fn update_at_startup(mut self, enabled: bool) -> Self {
        self.config.update_at_startup = enabled;
        self
    }

    pub fn silent_mode(mut self, enabled: bool) -> Self {
        self.config.silent_mode = enabled;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn auto_reload(mut self, enabled: bool) -> Self {
        self.config.auto_reload = enabled;
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn installer(mut self, installer: impl Installer + 'static) -> Self {
        self.installer = Some(Arc::new(installer));
        self
    }

    pub fn restarter(mut self, restarter: impl ProcessRestarter + 'static) -> Self {
        self.restarter = Some(Arc::new(restarter));
        self
    }

    /// Build an automatic loader without starting its polling loop.
    /// Call [`RequirementLoader::resume_polling`] to start it.
    pub fn suspend_polling(mut self) -> Self {
        self.suspended = true;
        self
    }

    /// Validate the configuration, run the startup cycle if enabled, and start
    /// polling in automatic mode. Must be called within a Tokio runtime.
    pub async fn start(self) -> Result<RequirementLoader, LoaderError> {
        self.config.validate()?;

        let inner = Arc::new(Inner {
            detector: ChangeDetector::new(self.config.snapshot_path.clone()),
            transport: self
                .transport
                .unwrap_or_else(|| Arc::new(ReqwestTransport::new()) as Arc<dyn Transport>),
            installer: self
                .installer
                .unwrap_or_else(|| Arc::new(CommandInstaller::default()) as Arc<dyn Installer>),
            restarter: self
                .restarter
                .unwrap_or_else(|| Arc::new(ExecRestarter) as Arc<dyn ProcessRestarter>),
            snapshot: tokio::sync::Mutex::new(None),
            pending_install: AtomicBool::new(false),
            config: self.config,
        });

        tracing::debug!(
            "Starting requirement loader for {} in {:?} mode",
            inner.config.locator,
            inner.config.mode()
        );

        if inner.config.update_at_startup {
            inner
                .run_cycle(CycleTrigger::Startup, inner.transport.as_ref())
                .await?;
        }

        let loader = RequirementLoader {
            inner,
            poller: Mutex::new(None),
        };

        if loader.mode() == Mode::Automatic && !self.suspended {
            loader.resume_polling()?;
        }

        Ok(loader)
    }
}

/// Self-updating dependency loader.
///
/// Dropping the loader does not stop a running polling loop; it lives until
/// the runtime or the process shuts down.
pub struct RequirementLoader {
    inner: Arc<Inner>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl RequirementLoader {
    pub fn builder(locator: impl Into<String>) -> LoaderBuilder {
        LoaderBuilder::new(locator)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn mode(&self) -> Mode {
        self.inner.config.mode()
    }

    pub fn state(&self) -> LoaderState {
        match self.mode() {
            Mode::Manual => LoaderState::ManualReady,
            Mode::Automatic if self.is_polling() => LoaderState::AutoPolling,
            Mode::Automatic => LoaderState::Idle,
        }
    }

    /// Whether the background loop is alive. A loop whose task ended (for
    /// example because its runtime shut down) no longer counts.
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start the background loop of a suspended automatic loader, or restart
    /// one whose task has ended. Does nothing if the loop is running.
    ///
    /// The loop is spawned onto the current Tokio runtime, so this must be
    /// called from within one; outside a runtime it panics.
    pub fn resume_polling(&self) -> Result<(), LoaderError> {
        if self.mode() == Mode::Manual {
            return Err(LoaderError::Conflict);
        }
        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if !poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            *poller = Some(spawn_poller(self.inner.clone()));
        }
        Ok(())
    }

    /// Run one manual cycle. Installation always runs, even when the manifest
    /// did not change. With `request_restart`, the process is replaced after a
    /// successful install.
    pub async fn trigger_update(&self, request_restart: bool) -> Result<UpdateOutcome, LoaderError> {
        self.trigger_update_with(request_restart, self.inner.transport.as_ref())
            .await
    }

    /// Like [`trigger_update`](Self::trigger_update) but fetches through the
    /// given transport for this call only.
    pub async fn trigger_update_with(
        &self,
        request_restart: bool,
        transport: &dyn Transport,
    ) -> Result<UpdateOutcome, LoaderError> {
        ensure_outside_cycle("trigger_update")?;
        if self.mode() == Mode::Automatic {
            return Err(LoaderError::Conflict);
        }
        self.inner
            .run_cycle(CycleTrigger::Manual { request_restart }, transport)
            .await
    }

    /// Fetch the manifest and compare it with the snapshot without persisting
    /// or installing anything.
    pub async fn fetch_only(&self) -> Result<FetchReport, LoaderError> {
        self.fetch_only_with(self.inner.transport.as_ref()).await
    }

    pub async fn fetch_only_with(&self, transport: &dyn Transport) -> Result<FetchReport, LoaderError> {
        ensure_outside_cycle("fetch_only")?;
        self.inner.inspect(transport).await
    }

    /// The manifest seen by the most recent cycle, if any.
    pub async fn snapshot(&self) -> Result<Option<ManifestSnapshot>, LoaderError> {
        ensure_outside_cycle("snapshot")?;
        Ok(self.inner.snapshot.lock().await.clone())
    }
}

impl std::fmt::Debug for RequirementLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequirementLoader")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
