//! Persistent user settings in `<config_dir>/autocommit/config.json`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::budget::DEFAULT_TOKEN_BUDGET;
use crate::error::ConfigError;

pub const TOKEN_BUDGET_ENV: &str = "AUTOCOMMIT_TOKEN_BUDGET";
pub const MODEL_ENV: &str = "AUTOCOMMIT_MODEL";
pub const TIMEOUT_ENV: &str = "AUTOCOMMIT_TIMEOUT";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_REMOTE: &str = "origin";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const APP_DIR: &str = "autocommit";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub token_budget: usize,
    pub default_model: String,
    pub temperature: f32,
    pub remote: String,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            default_model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            remote: DEFAULT_REMOTE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Read the file at `path` and apply environment overrides.
    ///
    /// A missing file gives the defaults. An unreadable or malformed file
    /// is treated as empty.
    pub fn load_from(path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Ignoring malformed config {}: {e}", path.display());
                Config::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                Config::default()
            }
            Err(e) => {
                warn!("Could not read config {}: {e}", path.display());
                Config::default()
            }
        };
        config.apply_env();
        config
    }

    /// Load from the default location, or defaults when there is none.
    pub fn load() -> Self {
        match Self::default_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                warn!("{e}, using defaults");
                let mut config = Config::default();
                config.apply_env();
                config
            }
        }
    }

    fn apply_env(&mut self) {
        if let Some(budget) = env_parse::<usize>(TOKEN_BUDGET_ENV) {
            if budget > 0 {
                self.token_budget = budget;
            } else {
                warn!("{TOKEN_BUDGET_ENV} must be positive, ignoring");
            }
        }
        if let Ok(model) = std::env::var(MODEL_ENV)
            && !model.trim().is_empty()
        {
            self.default_model = model.trim().to_string();
        }
        if let Some(secs) = env_parse::<u64>(TIMEOUT_ENV) {
            if secs > 0 {
                self.timeout_secs = secs;
            } else {
                warn!("{TIMEOUT_ENV} must be positive, ignoring");
            }
        }
    }

    /// The ceiling the budget ledger is reset to at the start of a run.
    pub fn token_budget_ceiling(&self) -> usize {
        self.token_budget
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Set the token budget; it must be a positive integer.
    pub fn set_token_budget(&mut self, budget: i64) -> Result<(), ConfigError> {
        match usize::try_from(budget) {
            Ok(value) if value > 0 => {
                self.token_budget = value;
                Ok(())
            }
            _ => Err(ConfigError::InvalidBudget(budget)),
        }
    }

    /// Write atomically: a temp file in the same directory, then rename.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let dir = path.parent().ok_or(ConfigError::NoConfigDir)?;
        std::fs::create_dir_all(dir).map_err(ConfigError::WriteFailed)?;

        let json = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        let mut file = NamedTempFile::new_in(dir).map_err(ConfigError::WriteFailed)?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(ConfigError::WriteFailed)?;
        file.persist(path)
            .map_err(|e| ConfigError::WriteFailed(e.error))?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }
}

/// Parse an environment variable, warning when it is set but invalid.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid {name} value '{raw}', ignoring");
            None
        }
    }
}
