//! Configuration loader for Skylark.
//!
//! Reads `config.toml` (or the path given by `--config` / `SKYLARK_CONFIG`)
//! into [`BotConfig`], then applies `SKYLARK_*` environment overrides.
//! A missing file yields the defaults; an unreadable or malformed file is
//! an error.

use std::path::{Path, PathBuf};

use skylark_types::config::BotConfig;
use skylark_types::error::ConfigError;

/// Default config file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "SKYLARK_CONFIG";

/// Resolve the config path: explicit argument, then `SKYLARK_CONFIG`, then
/// `config.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

/// Load configuration from `path` and apply process environment overrides.
pub async fn load_config(path: &Path) -> Result<BotConfig, ConfigError> {
    let mut config = read_config_file(path).await?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Parse the file at `path` without looking at the environment.
pub async fn read_config_file(path: &Path) -> Result<BotConfig, ConfigError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("No config file at {}, using defaults", path.display());
            return Ok(BotConfig::default());
        }
        Err(err) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                message: err.to_string(),
            });
        }
    };

    toml::from_str::<BotConfig>(&content).map_err(|err| ConfigError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

/// Overwrite fields from `SKYLARK_*` variables. Empty values are ignored.
///
/// `lookup` is `std::env::var` in production and a map in tests.
pub fn apply_env_overrides<F>(config: &mut BotConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("SKYLARK_INSTANCE_URL") {
        config.instance.url = v;
    }
    if let Some(v) = get("SKYLARK_ACCESS_TOKEN") {
        config.instance.access_token = v;
    }
    if let Some(v) = get("SKYLARK_OPENAI_API_KEY") {
        config.openai.api_key = v;
    }
    if let Some(v) = get("SKYLARK_OPENAI_MODEL") {
        config.openai.model = v;
    }
    if let Some(v) = get("SKYLARK_OPENAI_API_BASE") {
        config.openai.api_base = v;
    }
    if let Some(v) = get("SKYLARK_DB_PATH") {
        config.db.path = v;
    }
    if let Some(v) = get("SKYLARK_LOG_LEVEL") {
        config.log.level = v;
    }
}
