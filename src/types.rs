use crate::error::LoaderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SNAPSHOT_PATH: &str = "requirements.txt";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_PYTHON: &str = "python3";

/// How a loader instance is driven. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A background loop polls the manifest on a timer.
    Automatic,
    /// Cycles only run when the caller asks for one.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    /// Automatic mode whose polling loop has not been started yet.
    Idle,
    AutoPolling,
    ManualReady,
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderState::Idle => write!(f, "idle"),
            LoaderState::AutoPolling => write!(f, "auto-polling"),
            LoaderState::ManualReady => write!(f, "manual-ready"),
        }
    }
}

/// Immutable configuration captured when a loader is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    pub locator: String,
    pub snapshot_path: PathBuf,
    pub update_at_startup: bool,
    pub silent_mode: bool,
    pub poll_interval: Duration,
    pub auto_reload: bool,
}

impl LoaderConfig {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            update_at_startup: true,
            silent_mode: false,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            auto_reload: true,
        }
    }

    pub fn mode(&self) -> Mode {
        if self.auto_reload {
            Mode::Automatic
        } else {
            Mode::Manual
        }
    }

    pub fn validate(&self) -> Result<(), LoaderError> {
        let invalid = |reason: &str| -> Result<(), LoaderError> {
            Err(LoaderError::InvalidConfig(reason.to_string()))
        };
        if self.locator.trim().is_empty() {
            return invalid("manifest locator cannot be empty");
        }
        if self.poll_interval.is_zero() {
            return invalid("poll interval must be greater than zero");
        }
        if self.snapshot_path.as_os_str().is_empty() {
            return invalid("snapshot path cannot be empty");
        }
        Ok(())
    }
}

/// Manifest content as of one fetch, and where it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSnapshot {
    pub content: String,
    pub path: PathBuf,
    pub fetched_at: DateTime<Utc>,
}

/// Result of one update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    pub changed: bool,
    pub installed: bool,
    pub restart_requested: bool,
}

/// Settings file used by the command-line front end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoaderSettings {
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    #[serde(default = "default_true")]
    pub update_at_startup: bool,
    #[serde(default)]
    pub silent_mode: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_true")]
    pub auto_reload: bool,
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_snapshot_path() -> String {
    DEFAULT_SNAPSHOT_PATH.to_string()
}
fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_python() -> String {
    DEFAULT_PYTHON.to_string()
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            locator: None,
            snapshot_path: default_snapshot_path(),
            update_at_startup: default_true(),
            silent_mode: false,
            poll_interval: default_poll_interval(),
            auto_reload: default_true(),
            python: default_python(),
        }
    }
}
