//! Process replacement after an install
//!
//! The real restarter never returns on success. Tests substitute a recording
//! implementation so the update cycle can be exercised in-process.

use crate::error::RestartError;
use std::path::PathBuf;
use std::process::Command;

pub trait ProcessRestarter: Send + Sync {
    /// Replace the current process with a fresh run of the same command line.
    fn restart(&self) -> Result<(), RestartError>;
}

/// Re-executes the current binary with its original arguments and environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecRestarter;

impl ProcessRestarter for ExecRestarter {
    fn restart(&self) -> Result<(), RestartError> {
        let program = std::env::current_exe().map_err(|source| RestartError {
            program: PathBuf::from("<current executable>"),
            source,
        })?;
        let args: Vec<_> = std::env::args_os().skip(1).collect();

        tracing::info!("Restarting {} to load new dependencies", program.display());

        let mut cmd = Command::new(&program);
        cmd.args(&args);
        replace_process(cmd, program)
    }
}

#[cfg(unix)]
fn replace_process(mut cmd: Command, program: PathBuf) -> Result<(), RestartError> {
    use std::os::unix::process::CommandExt;
    // exec only returns on failure
    let source = cmd.exec();
    Err(RestartError { program, source })
}

#[cfg(not(unix))]
fn replace_process(mut cmd: Command, program: PathBuf) -> Result<(), RestartError> {
    match cmd.spawn() {
        Ok(_) => std::process::exit(0),
        Err(source) => Err(RestartError { program, source }),
    }
}
