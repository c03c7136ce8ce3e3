mod cli;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ConfigAction, LoaderArgs};
use reqloader::config::{
    get_setting, get_settings_file_path, load_settings, loader_config, save_settings,
    set_setting, unset_setting, SETTING_KEYS,
};
use reqloader::{resolve, CommandInstaller, LoaderBuilder, LoaderSettings, LoaderState};
use std::path::PathBuf;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    let settings_path = match &cli.config {
        Some(path) => path.clone(),
        None => get_settings_file_path()?,
    };
    let mut settings = load_settings(&settings_path)?;

    match cli.command {
        Commands::Version => {
            println!("reqloader {}", cli::version_string());
        }

        Commands::Resolve { locator } => {
            println!("{}", resolve(&locator));
        }

        Commands::Run {
            loader,
            interval,
            no_startup_update,
            manual,
        } => {
            let mut builder = builder_for(&settings, &loader)?;
            if let Some(secs) = interval {
                builder = builder.poll_interval(Duration::from_secs(secs));
            }
            if no_startup_update {
                builder = builder.update_at_startup(false);
            }
            if manual {
                builder = builder.auto_reload(false);
            }

            let loader = builder.start().await?;
            if loader.state() == LoaderState::AutoPolling {
                tracing::info!("Watching {} (Ctrl-C to stop)", loader.config().locator);
                tokio::signal::ctrl_c().await?;
                tracing::info!("Stopping reqloader");
            }
        }

        Commands::Update { loader } => {
            let loader = builder_for(&settings, &loader)?
                .auto_reload(false)
                .update_at_startup(false)
                .start()
                .await?;
            let outcome = loader.trigger_update(false).await?;
            if outcome.changed {
                println!("Manifest changed; dependencies reinstalled.");
            } else {
                println!("Manifest unchanged; dependencies reinstalled.");
            }
        }

        Commands::Fetch { loader, show } => {
            let loader = builder_for(&settings, &loader)?
                .auto_reload(false)
                .update_at_startup(false)
                .start()
                .await?;
            let report = loader.fetch_only().await?;
            println!("Source:  {}", report.plan);
            println!(
                "Status:  {}",
                if report.changed { "changed" } else { "unchanged" }
            );
            if show {
                println!("{}", report.content);
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Get { key } => {
                if let Some(key) = key {
                    match get_setting(&settings, &key) {
                        Some(value) => println!("{}", value),
                        None => println!("Setting '{}' not found", key),
                    }
                } else {
                    print_settings_plain(&settings);
                }
            }
            ConfigAction::Set { args } => {
                let (key, value) = split_key_value(&args)?;
                set_setting(&mut settings, &key, &value)?;
                save_settings(&settings_path, &settings)?;
                tracing::info!("Setting '{}' updated to '{}'", key, value);
            }
            ConfigAction::Unset { key } => {
                unset_setting(&mut settings, &key)?;
                save_settings(&settings_path, &settings)?;
                tracing::info!("Setting '{}' unset", key);
            }
            ConfigAction::Show { format } => match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&settings)?),
                "yaml" => print!("{}", serde_yaml::to_string(&settings)?),
                "plain" => print_settings_plain(&settings),
                other => return Err(anyhow!("Unsupported format '{}'. Use json, yaml or plain", other)),
            },
        },
    }

    Ok(())
}

fn builder_for(settings: &LoaderSettings, args: &LoaderArgs) -> Result<LoaderBuilder> {
    let locator = args
        .locator
        .clone()
        .or_else(|| settings.locator.clone())
        .context("No manifest locator given. Pass one or run `reqloader config set locator <url>`")?;

    let mut builder = LoaderBuilder::from_config(loader_config(settings, &locator))
        .installer(CommandInstaller::pip(settings.python.clone()));
    if let Some(snapshot) = &args.snapshot {
        builder = builder.snapshot_path(PathBuf::from(snapshot));
    }
    if args.silent {
        builder = builder.silent_mode(true);
    }
    Ok(builder)
}

fn split_key_value(args: &[String]) -> Result<(String, String)> {
    match args {
        [single] => single
            .split_once('=')
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .ok_or_else(|| anyhow!("Invalid format. Use 'key=value' or 'key value'.")),
        [key, rest @ ..] => Ok((key.clone(), rest.join(" "))),
        [] => Err(anyhow!("Missing key and value")),
    }
}

fn print_settings_plain(settings: &LoaderSettings) {
    println!("--- Reqloader Settings ---");
    for key in SETTING_KEYS {
        println!("  {}: {}", key, get_setting(settings, key).unwrap_or_default());
    }
}

fn setup_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "warn"
    } else if cli.verbose == 1 {
        "info"
    } else {
        "debug"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}
