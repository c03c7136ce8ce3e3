//! Self-updating requirements loader
//!
//! Fetches a dependency manifest from a URL or local file, compares it with
//! the last persisted copy, installs the dependency set when it changes, and
//! can restart the hosting process so the new dependencies take effect.
//!
//! - [`source`]: locator classification and raw-URL rewriting
//! - [`fetch`]: manifest retrieval through an injectable [`Transport`]
//! - [`detect`]: byte-for-byte change detection against the snapshot file
//! - [`install`]: the installation step (`pip install -r` by default)
//! - [`restart`]: process re-execution
//! - [`controller`]: the [`RequirementLoader`] tying it together
//!
//! ```no_run
//! # async fn run() -> Result<(), reqloader::LoaderError> {
//! use std::time::Duration;
//!
//! let loader = reqloader::RequirementLoader::builder(
//!     "https://github.com/owner/app/blob/main/requirements.txt",
//! )
//! .poll_interval(Duration::from_secs(30))
//! .silent_mode(true)
//! .start()
//! .await?;
//! # let _ = loader;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod detect;
pub mod error;
pub mod fetch;
pub mod install;
pub mod restart;
pub mod source;
pub mod types;

pub use controller::{FetchReport, LoaderBuilder, RequirementLoader};
pub use detect::ChangeDetector;
pub use error::{FetchError, InstallError, LoaderError, PersistError, RestartError};
pub use fetch::{ReqwestTransport, Transport, TransportResponse};
pub use install::{CommandInstaller, Installer};
pub use restart::{ExecRestarter, ProcessRestarter};
pub use source::{resolve, FetchPlan, ManifestLocator};
pub use types::{LoaderConfig, LoaderSettings, LoaderState, ManifestSnapshot, Mode, UpdateOutcome};
