//! Bridge settings, read from the environment.
//!
//! - `STRATA_CORE_URL`: core service base URL (default `http://localhost:3000`)
//! - `STRATA_BRIDGE_ADDR`: listen address (default `0.0.0.0:8000`)
//! - `STRATA_BRIDGE_TIMEOUT_SECS`: per-request timeout towards the core (default 30)
//! - `STRATA_BRIDGE_BODY_LIMIT_BYTES`: largest accepted request body (default 8 MiB,
//!   the core's own default)

use std::time::Duration;

/// Matches the core server's default `body_limit_bytes`.
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub core_url: String,
    pub addr: String,
    pub timeout: Duration,
    pub body_limit_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            core_url: "http://localhost:3000".to_string(),
            addr: "0.0.0.0:8000".to_string(),
            timeout: Duration::from_secs(30),
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from `lookup`; unparsable numbers fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("STRATA_CORE_URL") {
            config.core_url = url.trim_end_matches('/').to_string();
        }
        if let Some(addr) = lookup("STRATA_BRIDGE_ADDR") {
            config.addr = addr;
        }
        if let Some(secs) = lookup("STRATA_BRIDGE_TIMEOUT_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.timeout = Duration::from_secs(secs),
                _ => tracing::warn!(
                    "Ignoring STRATA_BRIDGE_TIMEOUT_SECS={}: expected a positive integer",
                    secs
                ),
            }
        }
        if let Some(bytes) = lookup("STRATA_BRIDGE_BODY_LIMIT_BYTES") {
            match bytes.trim().parse::<usize>() {
                Ok(bytes) if bytes > 0 => config.body_limit_bytes = bytes,
                _ => tracing::warn!(
                    "Ignoring STRATA_BRIDGE_BODY_LIMIT_BYTES={}: expected a positive integer",
                    bytes
                ),
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_lookup(|_| None);
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = BridgeConfig::from_lookup(|key| match key {
            "STRATA_CORE_URL" => Some("http://core:9000/".to_string()),
            "STRATA_BRIDGE_TIMEOUT_SECS" => Some("5".to_string()),
            "STRATA_BRIDGE_BODY_LIMIT_BYTES" => Some("1048576".to_string()),
            _ => None,
        });
        assert_eq!(config.core_url, "http://core:9000");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.body_limit_bytes, 1024 * 1024);
        assert_eq!(config.addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_bad_timeout_ignored() {
        let config = BridgeConfig::from_lookup(|key| {
            (key == "STRATA_BRIDGE_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_bad_body_limit_ignored() {
        let config = BridgeConfig::from_lookup(|key| {
            (key == "STRATA_BRIDGE_BODY_LIMIT_BYTES").then(|| "0".to_string())
        });
        assert_eq!(config.body_limit_bytes, DEFAULT_BODY_LIMIT_BYTES);
    }
}
