//! Relay Configuration
//!
//! Defaults, an optional JSON file, then environment overrides.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::codec::charset;
use crate::transport::RetryPolicy;

/// Names the JSON config file.
pub const ENV_CONFIG: &str = "RELAY_CONFIG";
/// Overrides `bind_addr`.
pub const ENV_BIND: &str = "RELAY_BIND";
/// Overrides `list_limit`.
pub const ENV_LIST_LIMIT: &str = "RELAY_LIST_LIMIT";
/// Overrides `poll_interval_ms`.
pub const ENV_POLL_MS: &str = "RELAY_POLL_MS";
/// Overrides `source_encoding`.
pub const ENV_SOURCE_ENCODING: &str = "RELAY_SOURCE_ENCODING";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Cause.
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid JSON for [`RelayConfig`].
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment override has a bad value.
    #[error("bad value {value:?} for {var}")]
    BadOverride {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },

    /// A value is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// What is wrong.
        reason: String,
    },
}

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Listen address.
    pub bind_addr: SocketAddr,
    /// Longest list sent before truncation.
    pub list_limit: usize,
    /// Interval between synchronization ticks.
    pub poll_interval_ms: u64,
    /// Encoding used when a client accepts none we support.
    pub source_encoding: String,
    /// Partial I/O retry interval.
    pub io_retry_interval_ms: u64,
    /// Consecutive no-progress intervals before a connection fails.
    pub io_max_attempts: u32,
    /// Largest accepted inbound payload.
    pub max_payload_len: usize,
    /// Connections beyond this are closed on accept.
    pub max_connections: usize,
    /// Run a tick as soon as a control command completes.
    pub resync_after_control: bool,
    /// Subscribe new sessions when exactly one player exists.
    pub auto_select_single_player: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 34271)),
            list_limit: 200,
            poll_interval_ms: 2000,
            source_encoding: "UTF-8".to_string(),
            io_retry_interval_ms: 50,
            io_max_attempts: 40,
            max_payload_len: 4 * 1024 * 1024,
            max_connections: 64,
            resync_after_control: true,
            auto_select_single_player: true,
        }
    }
}

impl RelayConfig {
    /// Load from `RELAY_CONFIG` (if set) and environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(ENV_CONFIG) {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
            value
                .parse()
                .map_err(|_| ConfigError::BadOverride { var, value })
        }

        if let Some(v) = lookup(ENV_BIND) {
            self.bind_addr = parse(ENV_BIND, v)?;
        }
        if let Some(v) = lookup(ENV_LIST_LIMIT) {
            self.list_limit = parse(ENV_LIST_LIMIT, v)?;
        }
        if let Some(v) = lookup(ENV_POLL_MS) {
            self.poll_interval_ms = parse(ENV_POLL_MS, v)?;
        }
        if let Some(v) = lookup(ENV_SOURCE_ENCODING) {
            self.source_encoding = v;
        }
        Ok(())
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Invalid {
                field,
                reason: reason.to_string(),
            })
        };
        if self.list_limit == 0 {
            return invalid("list_limit", "must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms", "must be at least 1");
        }
        if self.io_retry_interval_ms == 0 {
            return invalid("io_retry_interval_ms", "must be at least 1");
        }
        if self.io_max_attempts == 0 {
            return invalid("io_max_attempts", "must be at least 1");
        }
        if self.max_connections == 0 {
            return invalid("max_connections", "must be at least 1");
        }
        if charset::lookup(&self.source_encoding).is_err() {
            return invalid("source_encoding", "not a supported ASCII-compatible encoding");
        }
        Ok(())
    }

    /// Tick interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Partial I/O budget.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.io_max_attempts, Duration::from_millis(self.io_retry_interval_ms))
    }

    /// The source encoding, resolved. Falls back to UTF-8 if unsupported;
    /// [`RelayConfig::validate`] rejects that case up front.
    pub fn source_encoding(&self) -> &'static encoding_rs::Encoding {
        match charset::lookup(&self.source_encoding) {
            Ok(encoding) => encoding,
            Err(e) => {
                warn!("Source encoding {:?} unusable ({}), using UTF-8", self.source_encoding, e);
                encoding_rs::UTF_8
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bind_addr.port(), 34271);
        assert_eq!(config.retry_policy().budget(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = RelayConfig::from_json(r#"{"list_limit": 50, "resync_after_control": false}"#).unwrap();
        assert_eq!(config.list_limit, 50);
        assert!(!config.resync_after_control);
        assert_eq!(config.poll_interval_ms, 2000);
    }

    #[test]
    fn test_unknown_json_type_rejected() {
        assert!(matches!(
            RelayConfig::from_json(r#"{"list_limit": "many"}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: BTreeMap<&str, &str> = [
            (ENV_BIND, "127.0.0.1:9000"),
            (ENV_LIST_LIMIT, "25"),
            (ENV_SOURCE_ENCODING, "latin1"),
        ]
        .into_iter()
        .collect();
        let mut config = RelayConfig::default();
        config
            .apply_overrides(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.list_limit, 25);
        assert_eq!(config.source_encoding(), encoding_rs::WINDOWS_1252);
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_override() {
        let mut config = RelayConfig::default();
        let result = config.apply_overrides(|var| (var == ENV_POLL_MS).then(|| "soon".to_string()));
        assert!(matches!(result, Err(ConfigError::BadOverride { var: ENV_POLL_MS, .. })));
    }

    #[test]
    fn test_validate_rejects() {
        let zero_limit = RelayConfig {
            list_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_limit.validate(),
            Err(ConfigError::Invalid { field: "list_limit", .. })
        ));

        let utf16 = RelayConfig {
            source_encoding: "UTF-16LE".into(),
            ..Default::default()
        };
        assert!(matches!(
            utf16.validate(),
            Err(ConfigError::Invalid { field: "source_encoding", .. })
        ));
    }

    #[test]
    fn test_unvalidated_bad_encoding_falls_back_to_utf8() {
        let config = RelayConfig {
            source_encoding: "no-such-charset".into(),
            ..Default::default()
        };
        assert_eq!(config.source_encoding(), encoding_rs::UTF_8);
    }
}
