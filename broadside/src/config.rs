//! Server configuration.
//!
//! Defaults match a single-node deployment; every field can be overridden
//! from the environment with [`ServerConfig::from_env`].
//!
//! | Variable                        | Default        |
//! |---------------------------------|----------------|
//! | `BROADSIDE_BIND`                | `0.0.0.0:3000` |
//! | `PORT`                          | (port only)    |
//! | `BROADSIDE_INVITE_TTL_SECS`     | `300`          |
//! | `BROADSIDE_GAME_TTL_SECS`       | `7200`         |
//! | `BROADSIDE_USER_TTL_SECS`       | `86400`        |
//! | `BROADSIDE_SWEEP_INTERVAL_SECS` | `5`            |
//! | `BROADSIDE_RATE_LIMIT`          | `20`           |
//! | `BROADSIDE_LOG`                 | `info`         |
//! | `BROADSIDE_LOG_JSON`            | `false`        |
//! | `OTLP_ENDPOINT`                 | unset          |

use std::time::Duration;

use thiserror::Error;

use crate::ratelimit::RateLimitConfig;
use crate::telemetry::TracingConfig;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{var}: expected {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, expected: &'static str, value: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            expected,
            value: value.into(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Lifetime of a pending invitation.
    pub invite_ttl: Duration,
    /// Lifetime of a game session record, counted from creation.
    pub game_ttl: Duration,
    /// Lifetime of a user record, counted from registration.
    pub user_ttl: Duration,
    pub sweep_interval: Duration,
    pub rate_limit: RateLimitConfig,
    pub log_level: String,
    pub log_json: bool,
    pub otlp_endpoint: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            invite_ttl: Duration::from_secs(300),
            game_ttl: Duration::from_secs(7200),
            user_ttl: Duration::from_secs(86_400),
            sweep_interval: Duration::from_secs(5),
            rate_limit: RateLimitConfig::new(20),
            log_level: "info".to_string(),
            log_json: false,
            otlp_endpoint: None,
        }
    }
}

impl ServerConfig {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(bind) = lookup("BROADSIDE_BIND") {
            config.bind_addr = bind;
        } else if let Some(port) = lookup("PORT") {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("PORT", "a port number", port.clone()))?;
            config.bind_addr = format!("0.0.0.0:{}", port);
        }

        if let Some(secs) = secs_var(&lookup, "BROADSIDE_INVITE_TTL_SECS")? {
            config.invite_ttl = secs;
        }
        if let Some(secs) = secs_var(&lookup, "BROADSIDE_GAME_TTL_SECS")? {
            config.game_ttl = secs;
        }
        if let Some(secs) = secs_var(&lookup, "BROADSIDE_USER_TTL_SECS")? {
            config.user_ttl = secs;
        }
        if let Some(secs) = secs_var(&lookup, "BROADSIDE_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = secs;
        }

        if let Some(rate) = lookup("BROADSIDE_RATE_LIMIT") {
            let rate: u32 = rate.trim().parse().map_err(|_| {
                ConfigError::invalid("BROADSIDE_RATE_LIMIT", "messages per second", rate.clone())
            })?;
            config.rate_limit = RateLimitConfig::new(rate);
        }

        if let Some(level) = lookup("BROADSIDE_LOG") {
            config.log_level = level;
        }
        if let Some(json) = lookup("BROADSIDE_LOG_JSON") {
            config.log_json = match json.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => return Err(ConfigError::invalid("BROADSIDE_LOG_JSON", "a boolean", json)),
            };
        }
        config.otlp_endpoint = lookup("OTLP_ENDPOINT").filter(|e| !e.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::invalid(
                "BROADSIDE_SWEEP_INTERVAL_SECS",
                "a positive number of seconds",
                "0",
            ));
        }
        Ok(())
    }

    /// Tracing settings derived from this config.
    pub fn tracing(&self) -> TracingConfig {
        let mut tracing = TracingConfig::new("broadside").with_level(self.log_level.clone());
        if self.log_json {
            tracing = tracing.with_json();
        }
        if let Some(endpoint) = &self.otlp_endpoint {
            tracing = tracing.with_otlp(endpoint.clone());
        }
        tracing
    }
}

fn secs_var(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<Duration>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::invalid(var, "a number of seconds", value.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.invite_ttl, Duration::from_secs(300));
        assert_eq!(config.game_ttl, Duration::from_secs(7200));
        assert_eq!(config.user_ttl, Duration::from_secs(86_400));
        assert_eq!(config.rate_limit.messages_per_second, 20);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("BROADSIDE_INVITE_TTL_SECS", "60"),
            ("BROADSIDE_RATE_LIMIT", "0"),
            ("BROADSIDE_LOG", "broadside=debug"),
            ("BROADSIDE_LOG_JSON", "true"),
            ("OTLP_ENDPOINT", "http://localhost:4317"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.invite_ttl, Duration::from_secs(60));
        assert!(!config.rate_limit.is_enabled());

        let tracing = config.tracing();
        assert_eq!(tracing.log_level, "broadside=debug");
        assert!(tracing.json_output);
        assert_eq!(tracing.otlp_endpoint.as_deref(), Some("http://localhost:4317"));
    }

    #[test]
    fn test_bind_wins_over_port() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("BROADSIDE_BIND", "127.0.0.1:9000"),
            ("PORT", "8080"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_invalid_values() {
        let err = ServerConfig::from_lookup(lookup(&[("BROADSIDE_GAME_TTL_SECS", "two hours")])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "BROADSIDE_GAME_TTL_SECS: expected a number of seconds, got 'two hours'"
        );

        assert!(ServerConfig::from_lookup(lookup(&[("PORT", "99999")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("BROADSIDE_LOG_JSON", "maybe")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("BROADSIDE_SWEEP_INTERVAL_SECS", "0")])).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(ServerConfig::default().validate().is_ok());

        let config = ServerConfig {
            sweep_interval: Duration::ZERO,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
