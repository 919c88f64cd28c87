//! Global configuration, loaded from `~/.burrow/config.toml`.
//!
//! Every field has a default so a missing file is never an error; an
//! unreadable or malformed file is surfaced rather than silently ignored.

use serde::Deserialize;
use thiserror::Error;

use crate::paths::config_path;

/// Error produced while loading the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for the expected schema.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Tunables for the engine and its network layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base URL of the package index.
    pub index_url: String,

    /// Upper bound on concurrent artifact fetches within one plan.
    pub fetch_concurrency: usize,

    /// Bounded retry count for transient network failures. Applies at the
    /// fetch layer only.
    pub fetch_retries: u32,

    /// Per-request network timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// How many times an install re-plans after detecting that the
    /// environment changed underneath the resolution.
    pub stale_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_url: "https://pkg.burrow.dev/index".to_string(),
            fetch_concurrency: 4,
            fetch_retries: 2,
            fetch_timeout_secs: 30,
            stale_retries: 3,
        }
    }
}

impl Config {
    /// Load the configuration, falling back to defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.fetch_concurrency >= 1);
        assert!(cfg.stale_retries >= 1);
        assert!(cfg.index_url.starts_with("https://"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let cfg: Config = toml::from_str("fetch_concurrency = 8").unwrap();
        assert_eq!(cfg.fetch_concurrency, 8);
        assert_eq!(cfg.fetch_retries, Config::default().fetch_retries);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: Result<Config, _> = toml::from_str("no_such_knob = true");
        assert!(parsed.is_err());
    }
}
