use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

/// `v<pkg>-<commit> (<branch>)` for development builds, the bare tag for
/// tagged releases.
pub fn version_string() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| match option_env!("REQLOADER_GIT_TAG") {
        Some(tag) => tag.to_string(),
        None => format!(
            "v{}-{} ({})",
            env!("CARGO_PKG_VERSION"),
            option_env!("REQLOADER_GIT_COMMIT").unwrap_or("unknown"),
            option_env!("REQLOADER_GIT_BRANCH").unwrap_or("unknown"),
        ),
    })
}

#[derive(Parser)]
#[command(name = "reqloader")]
#[command(about = "Keep a Python environment in sync with a remote requirements file")]
#[command(version = version_string(), propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce output to errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the settings file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by commands that build a loader.
#[derive(Args, Debug, Clone, Default)]
pub struct LoaderArgs {
    /// Manifest locator (URL, file:// URL or path); defaults to the configured one
    pub locator: Option<String>,

    /// Where the manifest snapshot is persisted
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Hide installer output
    #[arg(long)]
    pub silent: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the loader; polls in the background unless --manual is given
    #[command(
        after_help = "Examples:\n  reqloader run https://github.com/owner/app/blob/main/requirements.txt\n  reqloader run file:///srv/app/requirements.txt --interval 60\n  reqloader run requirements.in --manual"
    )]
    Run {
        #[command(flatten)]
        loader: LoaderArgs,

        /// Seconds between polls
        #[arg(long)]
        interval: Option<u64>,

        /// Skip the forced install at startup
        #[arg(long)]
        no_startup_update: bool,

        /// Run the startup cycle only, without background polling
        #[arg(long)]
        manual: bool,
    },

    /// Fetch the manifest and reinstall once
    Update {
        #[command(flatten)]
        loader: LoaderArgs,
    },

    /// Check whether the manifest differs from the snapshot without installing
    Fetch {
        #[command(flatten)]
        loader: LoaderArgs,

        /// Print the fetched manifest
        #[arg(long)]
        show: bool,
    },

    /// Show how a locator will be fetched
    Resolve {
        /// Manifest locator
        locator: String,
    },

    /// Manage reqloader's configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the current version
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a configuration setting
    Get {
        /// Key to get (if omitted, shows all settings)
        key: Option<String>,
    },
    /// Set a configuration setting
    Set {
        /// Key and value (e.g., 'poll-interval=30' or 'poll-interval 30')
        #[arg(trailing_var_arg = true, required = true)]
        args: Vec<String>,
    },
    /// Reset a configuration setting to its default
    Unset {
        /// Key to unset (e.g., 'snapshot-path')
        key: String,
    },
    /// Show full configuration
    Show {
        /// Output format (json, yaml, plain)
        #[arg(long, default_value = "json")]
        format: String,
    },
}
