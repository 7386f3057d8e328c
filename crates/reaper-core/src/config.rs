//! Reaper configuration.
//!
//! Loaded once at startup and immutable afterwards. Sources, in order of
//! precedence:
//!
//! 1. `RYUK_`-prefixed environment variables
//! 2. Command-line overrides supplied by the daemon
//! 3. Built-in defaults
//!
//! Durations accept the humantime syntax (`100ms`, `5s`, `10m`);
//! `RYUK_RETRY_OFFSET` additionally accepts a leading `-`.

use crate::error::ConfigError;
use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration for the reaper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP port to listen on for client connections; 0 requests an
    /// OS-assigned port.
    pub port: u16,

    /// How long to wait for the first client before giving up.
    #[serde(with = "duration")]
    pub connection_timeout: Duration,

    /// Idle window after the last client leaves before pruning starts.
    #[serde(with = "duration")]
    pub reconnection_timeout: Duration,

    /// Timeout applied to every runtime API call.
    #[serde(with = "duration")]
    pub request_timeout: Duration,

    /// Delete attempts per resource kind.
    pub remove_retries: u32,

    /// Offset added to the prune start to form the minimum creation time.
    /// Typically negative, tolerating clock skew on the runtime side.
    #[serde(with = "signed_duration")]
    pub retry_offset: chrono::Duration,

    /// Wait between recomputations after changes were detected.
    #[serde(with = "duration")]
    pub changes_retry_interval: Duration,

    /// Grace period after a shutdown signal before the prune is forced.
    #[serde(with = "duration")]
    pub shutdown_timeout: Duration,

    /// Enables debug-level logging.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            connection_timeout: Duration::from_secs(60),
            reconnection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            remove_retries: 10,
            retry_offset: chrono::Duration::seconds(-1),
            changes_retry_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(600),
            verbose: false,
        }
    }
}

impl Config {
    /// Loads the configuration from the environment, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or a value is out of
    /// range.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_port(None)
    }

    /// Like [`Config::load`], with a port override that applies only when
    /// `RYUK_PORT` is not set.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or a value is out of
    /// range.
    pub fn load_with_port(port: Option<u16>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(port) = port {
            figment = figment.merge(("port", port));
        }

        let cfg: Self = figment.merge(Env::prefixed("RYUK_")).extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let windows = [
            ("connection timeout", self.connection_timeout),
            ("reconnection timeout", self.reconnection_timeout),
            ("request timeout", self.request_timeout),
            ("changes retry interval", self.changes_retry_interval),
            ("shutdown timeout", self.shutdown_timeout),
        ];
        for (name, value) in windows {
            if value.is_zero() {
                return Err(ConfigError::invalid(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if self.remove_retries == 0 {
            return Err(ConfigError::invalid("remove retries must be at least 1"));
        }

        Ok(())
    }
}

/// Humantime (de)serialization for unsigned durations.
mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

/// Humantime (de)serialization with an optional leading `-`.
mod signed_duration {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &chrono::Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let magnitude = value
            .abs()
            .to_std()
            .map_err(|err| serde::ser::Error::custom(err.to_string()))?;
        let rendered = humantime::format_duration(magnitude);
        if *value < chrono::Duration::zero() {
            serializer.collect_str(&format_args!("-{rendered}"))
        } else {
            serializer.collect_str(&rendered)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<chrono::Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim();
        let (negative, rest) = trimmed
            .strip_prefix('-')
            .map_or((false, trimmed), |rest| (true, rest));

        let magnitude = humantime::parse_duration(rest).map_err(serde::de::Error::custom)?;
        let delta =
            chrono::Duration::from_std(magnitude).map_err(serde::de::Error::custom)?;
        Ok(if negative { -delta } else { delta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_load() -> Result<Config, figment::Error> {
        Config::load().map_err(|err| figment::Error::from(err.to_string()))
    }

    #[test]
    fn defaults_apply_without_env() {
        figment::Jail::expect_with(|_jail| {
            let cfg = try_load()?;
            assert_eq!(cfg.port, 8080);
            assert_eq!(cfg.connection_timeout, Duration::from_secs(60));
            assert_eq!(cfg.reconnection_timeout, Duration::from_secs(10));
            assert_eq!(cfg.request_timeout, Duration::from_secs(10));
            assert_eq!(cfg.remove_retries, 10);
            assert_eq!(cfg.retry_offset, chrono::Duration::seconds(-1));
            assert_eq!(cfg.changes_retry_interval, Duration::from_secs(1));
            assert_eq!(cfg.shutdown_timeout, Duration::from_secs(600));
            assert!(!cfg.verbose);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_apply() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RYUK_PORT", "8081");
            jail.set_env("RYUK_CONNECTION_TIMEOUT", "10s");
            jail.set_env("RYUK_RECONNECTION_TIMEOUT", "100ms");
            jail.set_env("RYUK_RETRY_OFFSET", "-2s");
            jail.set_env("RYUK_VERBOSE", "true");

            let cfg = try_load()?;
            assert_eq!(cfg.port, 8081);
            assert_eq!(cfg.connection_timeout, Duration::from_secs(10));
            assert_eq!(cfg.reconnection_timeout, Duration::from_millis(100));
            assert_eq!(cfg.retry_offset, chrono::Duration::seconds(-2));
            assert!(cfg.verbose);
            Ok(())
        });
    }

    #[test]
    fn malformed_duration_is_fatal() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RYUK_CONNECTION_TIMEOUT", "bad_value");
            assert!(try_load().is_err());
            Ok(())
        });
    }

    #[test]
    fn malformed_port_is_fatal() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RYUK_PORT", "70000");
            assert!(try_load().is_err());
            Ok(())
        });
    }

    #[test]
    fn malformed_bool_is_fatal() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RYUK_VERBOSE", "bad_value");
            assert!(try_load().is_err());
            Ok(())
        });
    }

    #[test]
    fn zero_timeout_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RYUK_REQUEST_TIMEOUT", "0s");
            let err = try_load().unwrap_err();
            assert!(err.to_string().contains("request timeout"));
            Ok(())
        });
    }

    #[test]
    fn zero_retries_are_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RYUK_REMOVE_RETRIES", "0");
            let err = try_load().unwrap_err();
            assert!(err.to_string().contains("remove retries"));
            Ok(())
        });
    }

    #[test]
    fn port_flag_applies_when_env_is_absent() {
        figment::Jail::expect_with(|_jail| {
            let cfg = Config::load_with_port(Some(3000))
                .map_err(|err| figment::Error::from(err.to_string()))?;
            assert_eq!(cfg.port, 3000);
            Ok(())
        });
    }

    #[test]
    fn env_port_wins_over_flag() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RYUK_PORT", "8081");
            let cfg = Config::load_with_port(Some(3000))
                .map_err(|err| figment::Error::from(err.to_string()))?;
            assert_eq!(cfg.port, 8081);
            Ok(())
        });
    }

    #[test]
    fn retry_offset_roundtrips_through_defaults() {
        // The default layer is serialized before the env is merged, so the
        // signed form must survive a round trip.
        figment::Jail::expect_with(|_jail| {
            let cfg = try_load()?;
            assert!(cfg.retry_offset < chrono::Duration::zero());
            Ok(())
        });
    }
}
