use std::path::Path;

use reqwest::Url;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    for (name, url) in config.services.urls() {
        validate_service_url(name, url)?;
    }

    if config.http.connect_timeout_secs == 0 || config.http.request_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "HTTP timeouts must be greater than zero".to_string(),
        });
    }

    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        return Err(ConfigError::Validation {
            message: format!(
                "retry.baseDelayMs ({}) exceeds retry.maxDelayMs ({})",
                config.retry.base_delay_ms, config.retry.max_delay_ms
            ),
        });
    }

    Ok(())
}

/// Service URLs must parse as absolute http(s) base URLs with a host.
fn validate_service_url(name: &'static str, url: &str) -> Result<(), ConfigError> {
    let usable = Url::parse(url).is_ok_and(|parsed| {
        matches!(parsed.scheme(), "http" | "https")
            && parsed.has_host()
            && !parsed.cannot_be_a_base()
    });

    if usable {
        Ok(())
    } else {
        Err(ConfigError::InvalidServiceUrl {
            name,
            url: crate::sanitize::redact_url(url),
        })
    }
}
