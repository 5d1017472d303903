// Configuration loading, validation, and the default file-path lookup.
//
// Loading hierarchy: env > file > defaults.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::env::apply_env_overrides;
use crate::schema::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("validation error: {0}")]
    Validation(String),
}

pub fn load_config(path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) if p.exists() => load_from_file(&p)?,
        Some(_) => Config::default(),
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                load_from_file(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn load_from_file(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let mut path = PathBuf::from(home);
    path.push(".shm");
    path.push("config.toml");
    path
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.sessions.session_id_key_length == 0 {
        return Err(ConfigError::Validation(
            "sessions.session_id_key_length must be positive".to_string(),
        ));
    }
    if config.sessions.session_life_time <= 0 {
        return Err(ConfigError::Validation(
            "sessions.session_life_time must be positive".to_string(),
        ));
    }
    if config.top.max_handlers_for_user == 0 {
        return Err(ConfigError::Validation(
            "top.max_handlers_for_user must be positive".to_string(),
        ));
    }
    if config.brute.block_attempts == 0 {
        return Err(ConfigError::Validation(
            "brute.block_attempts must be positive".to_string(),
        ));
    }
    Ok(())
}
