//! # Server Configuration
//!
//! `ServerConfig` is assembled in three layers, later layers winning:
//!
//! 1. TOML file (`--config PATH`, else `strata.toml` in the working
//!    directory if it exists)
//! 2. `STRATA_*` environment variables
//! 3. CLI flags
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 3000
//! data = "/var/lib/strata/strata.redb"
//! query_timeout_ms = 5000
//! cors_origins = ["https://app.example.com"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::{EngineConfig, StrataError};

/// File consulted when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "strata.toml";

/// Resolved settings for the server and CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Journal path; `None` runs in memory.
    pub data: Option<PathBuf>,
    pub query_timeout_ms: u64,
    pub max_query_timeout_ms: u64,
    pub write_lock_timeout_ms: u64,
    pub body_limit_bytes: usize,
    /// Allowed CORS origins. Empty means localhost only; `["*"]` allows all.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            data: None,
            query_timeout_ms: 5_000,
            max_query_timeout_ms: 30_000,
            write_lock_timeout_ms: 2_000,
            body_limit_bytes: 8 * 1024 * 1024,
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load the file layer and the environment layer.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, StrataError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, StrataError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StrataError::Storage(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&text)
            .map_err(|e| StrataError::BadRequest(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(text: &str) -> Result<Self, StrataError> {
        toml::from_str(text).map_err(|e| StrataError::BadRequest(format!("invalid config: {}", e)))
    }

    /// Override fields from `STRATA_*` variables found through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), StrataError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("STRATA_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("STRATA_PORT") {
            self.port = parse_env("STRATA_PORT", &port)?;
        }
        if let Some(data) = lookup("STRATA_DATA") {
            self.data = (!data.is_empty()).then(|| PathBuf::from(data));
        }
        if let Some(ms) = lookup("STRATA_QUERY_TIMEOUT_MS") {
            self.query_timeout_ms = parse_env("STRATA_QUERY_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("STRATA_MAX_QUERY_TIMEOUT_MS") {
            self.max_query_timeout_ms = parse_env("STRATA_MAX_QUERY_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("STRATA_WRITE_LOCK_TIMEOUT_MS") {
            self.write_lock_timeout_ms = parse_env("STRATA_WRITE_LOCK_TIMEOUT_MS", &ms)?;
        }
        if let Some(origins) = lookup("STRATA_CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    /// `host:port` for the listener.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Engine limits derived from this config.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            query_timeout: Duration::from_millis(self.query_timeout_ms),
            max_query_timeout: Duration::from_millis(self.max_query_timeout_ms),
            write_lock_timeout: Duration::from_millis(self.write_lock_timeout_ms),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, StrataError> {
    value
        .trim()
        .parse()
        .map_err(|_| StrataError::BadRequest(format!("{}: invalid value '{}'", key, value)))
}
