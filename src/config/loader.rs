//! Configuration loading from disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::config::schema::MonitorConfig;
use crate::config::validation::{validate_config, validate_rules, ValidationError};
use crate::security::error::SecurityError;
use crate::security::rate_limit::{default_rules, RateLimitRule, RuleTable};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("Invalid rule table: {0}")]
    Rules(#[from] SecurityError),
}

/// The part of the config file that can change without a restart.
#[derive(Debug, Deserialize)]
struct RulesSection {
    #[serde(default = "default_rules")]
    rate_limits: BTreeMap<String, RateLimitRule>,
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<MonitorConfig, ConfigError> {
    let config: MonitorConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<MonitorConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate only the `[rate_limits]` tables of a config file.
pub fn parse_rules(content: &str) -> Result<RuleTable, ConfigError> {
    let section: RulesSection = toml::from_str(content)?;
    validate_rules(&section.rate_limits).map_err(ConfigError::Validation)?;
    Ok(RuleTable::new(section.rate_limits)?)
}

pub fn load_rules(path: &Path) -> Result<RuleTable, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_rules(&content)
}
