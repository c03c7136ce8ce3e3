use crate::error::InstallError;
use crate::types::DEFAULT_PYTHON;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Installs the dependency set described by a manifest file.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, manifest_path: &Path, silent: bool) -> Result<(), InstallError>;
}

/// Runs an external program with the manifest path appended to its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
}

impl CommandInstaller {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `<python> -m pip install -r <manifest>`
    pub fn pip(python: impl Into<String>) -> Self {
        Self::new(python, ["-m", "pip", "install", "-r"])
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for CommandInstaller {
    fn default() -> Self {
        Self::pip(DEFAULT_PYTHON)
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn install(&self, manifest_path: &Path, silent: bool) -> Result<(), InstallError> {
        tracing::info!(
            "Installing dependencies from {} with {}...",
            manifest_path.display(),
            self.program
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(manifest_path);
        if silent {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        tracing::debug!("Executing: {:?} {:?} {}", self.program, self.args, manifest_path.display());

        let status = cmd.status().await.map_err(|source| InstallError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !status.success() {
            return Err(InstallError::Failed {
                exit_code: status.code(),
            });
        }

        tracing::info!("Dependencies installed from {}", manifest_path.display());
        Ok(())
    }
}
