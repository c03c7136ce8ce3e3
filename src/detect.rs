//! Change detection against the persisted manifest snapshot
//!
//! Comparison is byte-for-byte on the raw text. The snapshot file is replaced
//! wholesale when it changes; there is no partial-write protocol.

use crate::error::PersistError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    path: PathBuf,
}

impl ChangeDetector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current snapshot content. A missing file reads as empty.
    pub async fn persisted(&self) -> Result<String, PersistError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(PersistError {
                path: self.path.clone(),
                changed: true,
                source,
            }),
        }
    }

    /// Compare without writing anything.
    pub async fn differs(&self, new_content: &str) -> Result<bool, PersistError> {
        Ok(self.persisted().await? != new_content)
    }

    /// Compare against the snapshot and overwrite it when the content differs.
    pub async fn detect_and_persist(&self, new_content: &str) -> Result<bool, PersistError> {
        if !self.differs(new_content).await? {
            tracing::debug!("Manifest unchanged at {}", self.path.display());
            return Ok(false);
        }

        self.write(new_content, true).await?;
        tracing::info!("Manifest changed, snapshot updated at {}", self.path.display());
        Ok(true)
    }

    /// Make sure a snapshot file exists so an installer has something to read.
    pub(crate) async fn ensure_exists(&self, content: &str) -> Result<(), PersistError> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        self.write(content, false).await
    }

    async fn write(&self, content: &str, changed: bool) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| PersistError {
                    path: self.path.clone(),
                    changed,
                    source,
                })?;
        }
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|source| PersistError {
                path: self.path.clone(),
                changed,
                source,
            })
    }
}
