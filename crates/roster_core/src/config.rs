//! Core configuration.
//!
//! # Responsibility
//! - Define collection names and validation thresholds used by core services.
//! - Load configuration from TOML with environment overrides.
//!
//! # Invariants
//! - Missing keys fall back to defaults; unknown keys are rejected.
//! - A missing config file is not an error.
//! - Environment overrides apply after the file is parsed.

use crate::logging::default_log_level;
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const ENV_LOG_LEVEL: &str = "ROSTER_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "ROSTER_LOG_DIR";

/// Settings shared by session, record and sync services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// Collection holding one profile document per identity.
    pub users_collection: String,
    /// Collection holding the live people records.
    pub records_collection: String,
    pub min_password_len: usize,
    pub min_age: u32,
    pub send_verification_on_register: bool,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            users_collection: "users".to_string(),
            records_collection: "usuarios".to_string(),
            min_password_len: 6,
            min_age: 18,
            send_verification_on_register: true,
            log_level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, message: String },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, message } => {
                write!(f, "failed to parse config `{}`: {message}", path.display())
            }
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl CoreConfig {
    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|err| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.users_collection.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "users_collection cannot be empty".to_string(),
            ));
        }
        if self.records_collection.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "records_collection cannot be empty".to_string(),
            ));
        }
        if self.min_password_len == 0 {
            return Err(ConfigError::Invalid(
                "min_password_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies overrides from a variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|value| !value.trim().is_empty()) {
            self.log_level = level.trim().to_string();
        }
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|value| !value.trim().is_empty()) {
            self.log_dir = Some(PathBuf::from(dir.trim()));
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }
}

/// Loads config from `path`, then applies environment overrides.
pub fn load_config(path: impl AsRef<Path>) -> Result<CoreConfig, ConfigError> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?
    } else {
        info!(
            "event=config_load module=config status=skipped reason=missing_file path={}",
            path.display()
        );
        CoreConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
