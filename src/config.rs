use crate::types::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "reqloader";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const SETTING_KEYS: &[&str] = &[
    "locator",
    "snapshot_path",
    "update_at_startup",
    "silent_mode",
    "poll_interval",
    "auto_reload",
    "python",
];

pub fn get_user_config_dir() -> Result<PathBuf> {
    let path = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join(APP_NAME);
    tracing::debug!("User config directory: {}", path.display());
    Ok(path)
}

/// Settings file location: `REQLOADER_CONFIG` or `<config_dir>/reqloader/config.json`.
pub fn get_settings_file_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("REQLOADER_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    Ok(get_user_config_dir()?.join(CONFIG_FILE_NAME))
}

pub fn load_settings(path: &Path) -> Result<LoaderSettings> {
    let mut settings = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read config file at {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| "Could not parse config file as JSON")?
    } else {
        LoaderSettings::default()
    };

    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn apply_env_overrides(settings: &mut LoaderSettings) {
    if let Ok(locator) = std::env::var("REQLOADER_LOCATOR") {
        settings.locator = Some(locator);
    }

    if let Ok(path) = std::env::var("REQLOADER_SNAPSHOT_PATH") {
        settings.snapshot_path = path;
    }

    if let Ok(secs) = std::env::var("REQLOADER_POLL_INTERVAL") {
        if let Ok(secs) = secs.parse::<u64>() {
            settings.poll_interval = secs;
        }
    }

    if let Ok(silent) = std::env::var("REQLOADER_SILENT") {
        settings.silent_mode = parse_bool(&silent);
    }

    if let Ok(auto_reload) = std::env::var("REQLOADER_AUTO_RELOAD") {
        settings.auto_reload = parse_bool(&auto_reload);
    }

    if let Ok(python) = std::env::var("REQLOADER_PYTHON") {
        settings.python = python;
    }
}

pub fn save_settings(path: &Path, settings: &LoaderSettings) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    let content = serde_json::to_string_pretty(settings)?;
    fs::write(path, content)
        .with_context(|| format!("Could not write config file at {}", path.display()))?;

    Ok(())
}

pub fn parse_bool(value: &str) -> bool {
    value.to_lowercase() == "true" || value == "1"
}

/// Map `poll-interval`, `pollInterval` and `POLL_INTERVAL` to `poll_interval`.
pub fn normalize_key(key: &str) -> String {
    let mut normalized = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.trim().chars() {
        match c {
            '-' | '_' | ' ' => {
                normalized.push('_');
                prev_lower = false;
            }
            c if c.is_ascii_uppercase() => {
                if prev_lower {
                    normalized.push('_');
                }
                normalized.push(c.to_ascii_lowercase());
                prev_lower = false;
            }
            c => {
                normalized.push(c);
                prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            }
        }
    }
    normalized
}

pub fn get_setting(settings: &LoaderSettings, key: &str) -> Option<String> {
    let value = match normalize_key(key).as_str() {
        "locator" => settings.locator.clone().unwrap_or_default(),
        "snapshot_path" => settings.snapshot_path.clone(),
        "update_at_startup" => settings.update_at_startup.to_string(),
        "silent_mode" => settings.silent_mode.to_string(),
        "poll_interval" => settings.poll_interval.to_string(),
        "auto_reload" => settings.auto_reload.to_string(),
        "python" => settings.python.clone(),
        _ => return None,
    };
    Some(value)
}

pub fn set_setting(settings: &mut LoaderSettings, key: &str, value: &str) -> Result<()> {
    match normalize_key(key).as_str() {
        "locator" => settings.locator = Some(value.to_string()),
        "snapshot_path" => settings.snapshot_path = value.to_string(),
        "update_at_startup" => settings.update_at_startup = parse_bool(value),
        "silent_mode" => settings.silent_mode = parse_bool(value),
        "poll_interval" => {
            let secs = value
                .parse::<u64>()
                .with_context(|| format!("Invalid value for 'poll_interval': {}", value))?;
            if secs == 0 {
                anyhow::bail!("'poll_interval' must be greater than zero");
            }
            settings.poll_interval = secs;
        }
        "auto_reload" => settings.auto_reload = parse_bool(value),
        "python" => settings.python = value.to_string(),
        other => anyhow::bail!(
            "'{}' is not a valid configuration setting. Valid settings: {}",
            other,
            SETTING_KEYS.join(", ")
        ),
    }
    Ok(())
}

pub fn unset_setting(settings: &mut LoaderSettings, key: &str) -> Result<()> {
    let defaults = LoaderSettings::default();
    match normalize_key(key).as_str() {
        "locator" => settings.locator = defaults.locator,
        "snapshot_path" => settings.snapshot_path = defaults.snapshot_path,
        "update_at_startup" => settings.update_at_startup = defaults.update_at_startup,
        "silent_mode" => settings.silent_mode = defaults.silent_mode,
        "poll_interval" => settings.poll_interval = defaults.poll_interval,
        "auto_reload" => settings.auto_reload = defaults.auto_reload,
        "python" => settings.python = defaults.python,
        other => anyhow::bail!(
            "'{}' is not a valid configuration setting. Valid settings: {}",
            other,
            SETTING_KEYS.join(", ")
        ),
    }
    Ok(())
}

/// Turn stored settings into a loader configuration for `locator`.
pub fn loader_config(settings: &LoaderSettings, locator: &str) -> LoaderConfig {
    LoaderConfig {
        locator: locator.to_string(),
        snapshot_path: PathBuf::from(&settings.snapshot_path),
        update_at_startup: settings.update_at_startup,
        silent_mode: settings.silent_mode,
        poll_interval: Duration::from_secs(settings.poll_interval),
        auto_reload: settings.auto_reload,
    }
}
