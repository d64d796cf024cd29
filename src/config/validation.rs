//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and combinations.
//! Validation is a pure function that reports every violation, not just the
//! first, and runs before configuration is accepted into the system.

use thiserror::Error;

use crate::config::schema::EngineConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.port must be non-zero")]
    ZeroPort,

    #[error("listener.request_timeout_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("rate_limit.{0} must be greater than zero when rate limiting is enabled")]
    RateLimitZero(&'static str),

    #[error("shutdown.{0} must be greater than zero")]
    ShutdownDeadlineZero(&'static str),

    #[error("worker.{0} must be greater than zero")]
    WorkerZero(&'static str),

    #[error("database.sentinel_table must not be empty")]
    EmptySentinel,

    #[error("database.schema_tool must not be empty")]
    EmptySchemaTool,
}

/// Validate a configuration, returning all violations found.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    if config.rate_limit.enabled {
        if config.rate_limit.requests_per_second == 0 {
            errors.push(ValidationError::RateLimitZero("requests_per_second"));
        }
        if config.rate_limit.burst_size == 0 {
            errors.push(ValidationError::RateLimitZero("burst_size"));
        }
        if config.rate_limit.idle_secs == 0 {
            errors.push(ValidationError::RateLimitZero("idle_secs"));
        }
        if config.rate_limit.max_clients == 0 {
            errors.push(ValidationError::RateLimitZero("max_clients"));
        }
    }

    if config.shutdown.queue_close_timeout_ms == 0 {
        errors.push(ValidationError::ShutdownDeadlineZero("queue_close_timeout_ms"));
    }
    if config.shutdown.http_drain_ms == 0 {
        errors.push(ValidationError::ShutdownDeadlineZero("http_drain_ms"));
    }

    if config.worker.concurrency == 0 {
        errors.push(ValidationError::WorkerZero("concurrency"));
    }
    if config.worker.queue_capacity == 0 {
        errors.push(ValidationError::WorkerZero("queue_capacity"));
    }

    if config.database.sentinel_table.trim().is_empty() {
        errors.push(ValidationError::EmptySentinel);
    }
    if config.database.schema_tool.trim().is_empty() {
        errors.push(ValidationError::EmptySchemaTool);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_violation() {
        let mut config = EngineConfig::default();
        config.listener.port = 0;
        config.shutdown.queue_close_timeout_ms = 0;
        config.worker.concurrency = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::ZeroPort,
                ValidationError::ShutdownDeadlineZero("queue_close_timeout_ms"),
                ValidationError::WorkerZero("concurrency"),
            ]
        );
    }

    #[test]
    fn zero_request_timeout_rejected() {
        let mut config = EngineConfig::default();
        config.listener.request_timeout_secs = 0;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::ZeroRequestTimeout]
        );
    }

    #[test]
    fn rate_limit_checked_only_when_enabled() {
        let mut config = EngineConfig::default();
        config.rate_limit.enabled = false;
        config.rate_limit.requests_per_second = 0;
        assert!(validate_config(&config).is_ok());
    }
}
