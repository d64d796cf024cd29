//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::{EngineConfig, LogFormat};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    Env {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the effective configuration: optional TOML file, then the process
/// environment on top, then validation.
pub fn load(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let base = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => EngineConfig::default(),
    };

    let config = apply_env(base, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay environment variables onto `config`.
///
/// `lookup` abstracts the environment so callers (and tests) can supply any
/// source. Empty values are treated as unset.
pub fn apply_env<F>(mut config: EngineConfig, lookup: F) -> Result<EngineConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("ENGINE_MODE") {
        config.mode = parse("ENGINE_MODE", &v)?;
    }
    if let Some(v) = get("NODE_ENV") {
        config.environment = v;
    }

    if let Some(v) = get("PORT") {
        config.listener.port = parse("PORT", &v)?;
    }
    if let Some(v) = get("ENABLE_HTTPS") {
        config.listener.https.enabled = parse_bool("ENABLE_HTTPS", &v)?;
    }
    if let Some(v) = get("HTTPS_PASSPHRASE") {
        config.listener.https.passphrase = Some(v);
    }
    if let Some(v) = get("TRUST_PROXY") {
        config.listener.trust_proxy = parse_bool("TRUST_PROXY", &v)?;
    }
    if let Some(v) = get("ENGINE_TIER") {
        config.listener.tier = Some(v);
    }
    if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
        config.listener.request_timeout_secs = parse("REQUEST_TIMEOUT_SECS", &v)?;
    }

    if let Some(v) = get("DATABASE_URL") {
        config.database.url = Some(v);
    }
    if let Some(v) = get("SCHEMA_TOOL") {
        config.database.schema_tool = v;
    }

    if let Some(v) = get("ENGINE_SANDBOX") {
        config.security.sandbox = parse_bool("ENGINE_SANDBOX", &v)?;
    }
    if let Some(v) = get("ACCESS_CONTROL_ALLOW_ORIGIN") {
        config.security.cors_origins = split_list(&v);
    }
    if let Some(v) = get("AUTH_ENABLED") {
        config.security.auth_enabled = parse_bool("AUTH_ENABLED", &v)?;
    }
    if let Some(v) = get("ACCESS_TOKENS") {
        config.security.access_tokens = split_list(&v);
    }
    if let Some(v) = get("ADMIN_API_KEY") {
        config.security.admin_api_key = Some(v);
    }

    if let Some(v) = get("RATE_LIMIT_PER_SECOND") {
        config.rate_limit.requests_per_second = parse("RATE_LIMIT_PER_SECOND", &v)?;
    }
    if let Some(v) = get("RATE_LIMIT_BURST") {
        config.rate_limit.burst_size = parse("RATE_LIMIT_BURST", &v)?;
    }

    if let Some(v) = get("METRICS_ENABLED") {
        config.observability.metrics_enabled = parse_bool("METRICS_ENABLED", &v)?;
    }
    if let Some(v) = get("LOG_FORMAT") {
        config.observability.log_format = match v.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => {
                return Err(ConfigError::Env {
                    key: "LOG_FORMAT",
                    value: v,
                    reason: "expected `json` or `pretty`".to_string(),
                })
            }
        };
    }

    if let Some(v) = get("SHUTDOWN_QUEUE_TIMEOUT_MS") {
        config.shutdown.queue_close_timeout_ms = parse("SHUTDOWN_QUEUE_TIMEOUT_MS", &v)?;
    }
    if let Some(v) = get("SHUTDOWN_HTTP_DRAIN_MS") {
        config.shutdown.http_drain_ms = parse("SHUTDOWN_HTTP_DRAIN_MS", &v)?;
    }
    if let Some(v) = get("WORKER_CONCURRENCY") {
        config.worker.concurrency = parse("WORKER_CONCURRENCY", &v)?;
    }

    Ok(config)
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            key,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::mode::OperatingMode;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = apply_env(EngineConfig::default(), env(&[])).unwrap();
        assert_eq!(config.mode, OperatingMode::Combined);
        assert_eq!(config.listener.port, 3000);
        assert_eq!(config.listener.request_timeout_secs, 60);
        assert!(!config.listener.https.enabled);
        assert!(!config.is_production());
    }

    #[test]
    fn environment_overrides() {
        let config = apply_env(
            EngineConfig::default(),
            env(&[
                ("ENGINE_MODE", "server_only"),
                ("PORT", "8080"),
                ("ENABLE_HTTPS", "true"),
                ("ENGINE_TIER", "premium"),
                ("NODE_ENV", "production"),
                ("ACCESS_TOKENS", "a, b,,c"),
                ("REQUEST_TIMEOUT_SECS", "15"),
            ]),
        )
        .unwrap();

        assert_eq!(config.mode, OperatingMode::ServerOnly);
        assert_eq!(config.listener.port, 8080);
        assert!(config.listener.https.enabled);
        assert!(config.listener.trusts_proxy());
        assert!(config.is_production());
        assert_eq!(config.security.access_tokens, vec!["a", "b", "c"]);
        assert_eq!(config.listener.request_timeout_secs, 15);
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = apply_env(EngineConfig::default(), env(&[("ENGINE_MODE", "sideways")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "ENGINE_MODE", .. }));
    }

    #[test]
    fn rejects_bad_port() {
        let err = apply_env(EngineConfig::default(), env(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "PORT", .. }));
    }

    #[test]
    fn empty_values_are_unset() {
        let config = apply_env(EngineConfig::default(), env(&[("PORT", "  ")])).unwrap();
        assert_eq!(config.listener.port, 3000);
    }

    #[test]
    fn parses_toml_file() {
        let config: EngineConfig = toml::from_str(
            r#"
            mode = "worker_only"

            [listener]
            port = 4000

            [shutdown]
            queue_close_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, OperatingMode::WorkerOnly);
        assert_eq!(config.listener.port, 4000);
        assert_eq!(config.shutdown.queue_close_timeout_ms, 250);
        assert_eq!(config.shutdown.http_drain_ms, 5_000);
    }
}
