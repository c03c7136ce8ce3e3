use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::TempDir;

#[allow(dead_code)]
pub struct TestContext {
    pub _temp_dir: TempDir,
    pub config_path: PathBuf,
    pub work_dir: PathBuf,
    pub bin_path: PathBuf,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config").join("config.json");
        let work_dir = temp_dir.path().join("work");
        std::fs::create_dir_all(&work_dir).expect("Failed to create work dir");

        let bin_path = PathBuf::from(env!("CARGO_BIN_EXE_reqloader"));

        Self {
            _temp_dir: temp_dir,
            config_path,
            work_dir,
            bin_path,
        }
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(&self.bin_path);
        cmd.current_dir(&self.work_dir);
        cmd.env("REQLOADER_CONFIG", &self.config_path);
        cmd.env_remove("REQLOADER_LOCATOR");
        cmd.env_remove("REQLOADER_SNAPSHOT_PATH");
        cmd.env_remove("REQLOADER_PYTHON");
        cmd.env_remove("RUST_LOG");
        cmd.env("HOME", self._temp_dir.path());
        cmd.env("XDG_CONFIG_HOME", self._temp_dir.path().join("xdg"));
        cmd
    }

    /// Write a manifest into the work directory and return its path.
    pub fn manifest(&self, name: &str, content: &str) -> PathBuf {
        let path = self.work_dir.join(name);
        std::fs::write(&path, content).expect("Failed to write manifest");
        path
    }
}

#[allow(dead_code)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }
}

#[allow(dead_code)]
impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        if !self.status.success() {
            panic!(
                "Command failed with status {:?}\nstdout: {}\nstderr: {}",
                self.status.code(),
                self.stdout,
                self.stderr
            );
        }
        self
    }

    pub fn assert_failure(&self) -> &Self {
        assert!(
            !self.status.success(),
            "Command unexpectedly succeeded\nstdout: {}",
            self.stdout
        );
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(
            self.stdout.contains(text),
            "Stdout did not contain '{}'\nActual stdout: {}",
            text,
            self.stdout
        );
        self
    }

    pub fn assert_stderr_contains(&self, text: &str) -> &Self {
        assert!(
            self.stderr.contains(text),
            "Stderr did not contain '{}'\nActual stderr: {}",
            text,
            self.stderr
        );
        self
    }
}
