//! Error taxonomy for the loader
//!
//! Fetch, persist and install failures are transient: the background loop logs
//! them and waits for the next tick. `Conflict` and `RestrictedOperation` are
//! programmer misuse and always surface synchronously. A restart failure is
//! fatal and terminates the process.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Manifest file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Could not read manifest file {}: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest source {url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Manifest request to {url} failed with status {status}")]
    BadStatus { url: String, status: u16 },
}

/// Writing the snapshot failed. `changed` still reports the comparison result.
#[derive(Debug, Error)]
#[error("Could not persist manifest snapshot to {}: {source}", path.display())]
pub struct PersistError {
    pub path: PathBuf,
    pub changed: bool,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Could not launch installer '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Installer exited with {}", describe_exit(*exit_code))]
    Failed { exit_code: Option<i32> },
}

impl InstallError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            InstallError::Failed { exit_code } => *exit_code,
            InstallError::Spawn { .. } => None,
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

#[derive(Debug, Error)]
#[error("Could not re-execute {}: {source}", program.display())]
pub struct RestartError {
    pub program: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Restart(#[from] RestartError),

    #[error("Manual updates are not allowed while the loader polls automatically")]
    Conflict,

    #[error("Operation '{0}' cannot be invoked from inside a running update cycle")]
    RestrictedOperation(&'static str),

    #[error("Invalid loader configuration: {0}")]
    InvalidConfig(String),
}

impl LoaderError {
    /// True for errors caused by calling the loader the wrong way.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            LoaderError::Conflict | LoaderError::RestrictedOperation(_)
        )
    }
}
