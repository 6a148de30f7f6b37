use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::KennelConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["kennel.toml", "kennel.yaml", "kennel.yml", "kennel.json"];

static DATA_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<KennelConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./kennel.{toml,yaml,yml,json}`
/// 2. `~/.config/kennel/kennel.{toml,yaml,yml,json}`
///
/// Returns `KennelConfig::default()` if no config file is found or it fails to parse.
pub fn discover_and_load() -> KennelConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    KennelConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/kennel/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "kennel").map(|d| d.config_dir().to_path_buf())
}

/// Override the data directory (CLI `--data-dir`).
pub fn set_data_dir(dir: PathBuf) {
    if let Ok(mut guard) = DATA_DIR_OVERRIDE.lock() {
        *guard = Some(dir);
    }
}

/// Data directory for the database and per-project volumes.
pub fn data_dir() -> PathBuf {
    if let Ok(guard) = DATA_DIR_OVERRIDE.lock()
        && let Some(dir) = guard.as_ref()
    {
        return dir.clone();
    }
    directories::ProjectDirs::from("", "", "kennel")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".kennel"))
}

/// Resolve the database URL: explicit config wins, else `kennel.db` in the data dir.
pub fn database_url(config: &KennelConfig) -> String {
    match config.database.url {
        Some(ref url) => url.clone(),
        None => format!("sqlite:{}?mode=rwc", data_dir().join("kennel.db").display()),
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<KennelConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
