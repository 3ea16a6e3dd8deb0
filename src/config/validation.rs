//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Every rule obeys `max_requests > 0` and `window_ms > 0`
//! - Rule names callers depend on are present
//! - Value ranges for event store and observability settings
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MonitorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::BTreeMap;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{MonitorConfig, PLACEHOLDER_API_KEY};
use crate::security::rate_limit::{RateLimitRule, MAX_WINDOW_MS, REQUIRED_RULES};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("rate_limits.{0}: max_requests must be greater than 0")]
    ZeroMaxRequests(String),

    #[error("rate_limits.{0}: window_ms must be greater than 0")]
    ZeroWindow(String),

    #[error("rate_limits.{0}: window_ms must not exceed one year")]
    WindowTooLong(String),

    #[error("rate_limits.{0}: required rule is missing")]
    MissingRule(&'static str),

    #[error("event_store.{0} must be greater than 0")]
    ZeroEventStoreSetting(&'static str),

    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("observability.log_format: unknown format '{0}'")]
    UnknownLogFormat(String),

    #[error("admin.api_key must be changed when the admin API is enabled")]
    PlaceholderApiKey,
}

pub fn validate_config(config: &MonitorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_rules(&mut errors, &config.rate_limits);

    let store = &config.event_store;
    if store.max_events_per_key == 0 {
        errors.push(ValidationError::ZeroEventStoreSetting("max_events_per_key"));
    }
    if store.ttl_secs == 0 {
        errors.push(ValidationError::ZeroEventStoreSetting("ttl_secs"));
    }
    if store.cleanup_interval_secs == 0 {
        errors.push(ValidationError::ZeroEventStoreSetting("cleanup_interval_secs"));
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::UnknownLogFormat(config.observability.log_format.clone()));
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::PlaceholderApiKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Rule table checks alone, as applied on reload.
pub fn validate_rules(rules: &BTreeMap<String, RateLimitRule>) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_rules(&mut errors, rules);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_rules(errors: &mut Vec<ValidationError>, rules: &BTreeMap<String, RateLimitRule>) {
    for (name, rule) in rules {
        if rule.max_requests == 0 {
            errors.push(ValidationError::ZeroMaxRequests(name.clone()));
        }
        if rule.window_ms == 0 {
            errors.push(ValidationError::ZeroWindow(name.clone()));
        } else if rule.window_ms > MAX_WINDOW_MS {
            errors.push(ValidationError::WindowTooLong(name.clone()));
        }
    }
    for name in REQUIRED_RULES {
        if !rules.contains_key(name) {
            errors.push(ValidationError::MissingRule(name));
        }
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&MonitorConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = MonitorConfig::default();
        config.rate_limits.remove("upload");
        config.rate_limits.insert("api".into(), RateLimitRule::new(0, 0));
        config.event_store.ttl_secs = 0;
        config.observability.log_format = "xml".into();
        config.admin.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::ZeroMaxRequests("api".into()),
                ValidationError::ZeroWindow("api".into()),
                ValidationError::MissingRule("upload"),
                ValidationError::ZeroEventStoreSetting("ttl_secs"),
                ValidationError::UnknownLogFormat("xml".into()),
                ValidationError::PlaceholderApiKey,
            ]
        );
    }

    #[test]
    fn test_rejects_window_longer_than_a_year() {
        let mut config = MonitorConfig::default();
        config
            .rate_limits
            .insert("api".into(), RateLimitRule::new(100, 9_000_000_000_000_000_000));
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::WindowTooLong("api".into())])
        );

        config
            .rate_limits
            .insert("api".into(), RateLimitRule::new(100, MAX_WINDOW_MS));
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn test_validate_rules_reports_missing_names() {
        let mut rules = crate::security::rate_limit::default_rules();
        rules.remove("login");
        assert_eq!(
            validate_rules(&rules),
            Err(vec![ValidationError::MissingRule("login")])
        );
    }

    #[test]
    fn test_rejects_bad_addresses() {
        let mut config = MonitorConfig::default();
        config.listener.bind_address = "localhost".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::InvalidAddress { field: "listener.bind_address", .. }]
        ));
    }
}
