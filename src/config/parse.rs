use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use crate::dispatch::types::is_e164;
use regex::Regex;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml)
}

/// Parse and validate a YAML config document
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;
    config.storage.path = expand_tilde(&config.storage.path);

    validate_config(&config)?;
    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut unexpanded: Vec<String> = yaml
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| {
            re.captures_iter(line)
                .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
                .collect::<Vec<_>>()
        })
        .collect();

    if unexpanded.is_empty() {
        return Ok(());
    }

    unexpanded.sort();
    unexpanded.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}\n\
         Set them (e.g. export {}=...) or replace the placeholders in the config file",
        unexpanded.join(", "),
        unexpanded[0]
    )))
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.server.listen.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "server.listen: '{}' is not a valid socket address",
            config.server.listen
        ));
    }

    match &config.carrier {
        CarrierConfig::Twilio(twilio) => {
            if twilio.account_sid.trim().is_empty() {
                errors.push("carrier.account_sid cannot be empty".to_string());
            }
            if twilio.auth_token.trim().is_empty() {
                errors.push("carrier.auth_token cannot be empty".to_string());
            }
            if !is_e164(&twilio.from_number) {
                errors.push(format!(
                    "carrier.from_number: '{}' is not an E.164 phone number",
                    twilio.from_number
                ));
            }
            if twilio.timeout.is_zero() {
                errors.push("carrier.timeout must be greater than zero".to_string());
            }
        }
        CarrierConfig::Simulated(sim) => {
            if !(0.0..=1.0).contains(&sim.failure_rate) {
                errors.push(format!(
                    "carrier.failure_rate: {} is outside [0, 1]",
                    sim.failure_rate
                ));
            }
        }
    }

    if config.storage.path.as_os_str().is_empty() {
        errors.push("storage.path cannot be empty".to_string());
    }

    if config.dispatch.recent_messages == 0 {
        errors.push("dispatch.recent_messages must be at least 1".to_string());
    }
    if config.dispatch.observer_buffer == 0 {
        errors.push("dispatch.observer_buffer must be at least 1".to_string());
    }

    for (name, rule) in [("api", &config.rate_limit.api), ("sms", &config.rate_limit.sms)] {
        if rule.max_requests == 0 {
            errors.push(format!("rate_limit.{}.max_requests must be at least 1", name));
        }
        if rule.window.is_zero() {
            errors.push(format!("rate_limit.{}.window must be greater than zero", name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}
