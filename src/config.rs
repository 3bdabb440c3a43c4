//! Configuration loaded from environment variables.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_BIND: ([u8; 4], u16) = ([127, 0, 0, 1], 8080);
pub const DEFAULT_SCHEDULER_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_SCHEDULER_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the HTTP server listens on
    pub bind: SocketAddr,
    /// Base URL of the solver service; `None` disables the external solver
    pub scheduler_url: Option<String>,
    /// Upper bound for the single solver request of a run
    pub scheduler_timeout: Duration,
    /// JSON file with periods, obligations and slots to preload
    pub seed_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(DEFAULT_BIND),
            scheduler_url: Some(DEFAULT_SCHEDULER_URL.to_string()),
            scheduler_timeout: Duration::from_millis(DEFAULT_SCHEDULER_TIMEOUT_MS),
            seed_file: None,
        }
    }
}

impl Config {
    /// Create a configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `TIMETABLE_BIND` (optional, default: 127.0.0.1:8080): listen address
    /// - `SCHEDULER_URL` (optional, default: http://127.0.0.1:8080): solver base URL;
    ///   an empty value disables the external solver
    /// - `SCHEDULER_TIMEOUT_MS` (optional, default: 5000): solver request timeout
    /// - `TIMETABLE_SEED` (optional): path to a JSON seed file
    ///
    /// # Errors
    /// Returns an error if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("TIMETABLE_BIND") {
            config.bind = value.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "TIMETABLE_BIND",
                value: value.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Some(value) = lookup("SCHEDULER_URL") {
            let trimmed = value.trim();
            config.scheduler_url = if trimmed.is_empty() {
                None
            } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
                Some(trimmed.to_string())
            } else {
                return Err(ConfigError::Invalid {
                    name: "SCHEDULER_URL",
                    value,
                    reason: "expected an http:// or https:// URL".to_string(),
                });
            };
        }

        if let Some(value) = lookup("SCHEDULER_TIMEOUT_MS") {
            let millis: u64 = value.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    name: "SCHEDULER_TIMEOUT_MS",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
            if millis == 0 {
                return Err(ConfigError::Invalid {
                    name: "SCHEDULER_TIMEOUT_MS",
                    value,
                    reason: "timeout must be positive".to_string(),
                });
            }
            config.scheduler_timeout = Duration::from_millis(millis);
        }

        config.seed_file = lookup("TIMETABLE_SEED")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
    }
}
