//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, port > 0)
//! - Check that addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DaemonConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::config::schema::DaemonConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Listener address is not an IP literal.
    #[error("listener.address {0:?} is not an IPv4 or IPv6 address")]
    ListenerAddress(String),

    /// Listener port is zero.
    #[error("listener.port must be greater than 0")]
    ListenerPort,

    /// A timeout is zero.
    #[error("{0} must be greater than 0")]
    Timeout(&'static str),

    /// Request size limit is zero.
    #[error("listener.max_request_size must be greater than 0")]
    RequestSize,

    /// Log level is not one of the tracing levels.
    #[error("observability.log_level {0:?} is not a valid level")]
    LogLevel(String),

    /// Metrics address is not a socket address.
    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &DaemonConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let listener = &config.listener;

    if listener.address.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::ListenerAddress(listener.address.clone()));
    }
    if listener.port == 0 {
        errors.push(ValidationError::ListenerPort);
    }
    if listener.request_timeout_ms == 0 {
        errors.push(ValidationError::Timeout("listener.request_timeout_ms"));
    }
    if listener.idle_timeout_ms == 0 {
        errors.push(ValidationError::Timeout("listener.idle_timeout_ms"));
    }
    if listener.max_request_size == 0 {
        errors.push(ValidationError::RequestSize);
    }

    let observability = &config.observability;
    if observability.log_level.parse::<tracing::Level>().is_err() {
        errors.push(ValidationError::LogLevel(observability.log_level.clone()));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::MetricsAddress(
            observability.metrics_address.clone(),
        ));
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
        assert!(validate_config(&DaemonConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_error() {
        let mut config = DaemonConfig::default();
        config.listener.address = "localhost".into();
        config.listener.request_timeout_ms = 0;
        config.listener.idle_timeout_ms = 0;
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::ListenerAddress("localhost".into()),
                ValidationError::Timeout("listener.request_timeout_ms"),
                ValidationError::Timeout("listener.idle_timeout_ms"),
                ValidationError::LogLevel("loud".into()),
            ]
        );
    }

    #[test]
    fn ipv6_listener_address_is_accepted() {
        let mut config = DaemonConfig::default();
        config.listener.address = "::1".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = DaemonConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::MetricsAddress("nowhere".into())]
        );
    }
}
