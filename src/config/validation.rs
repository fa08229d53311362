use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::config::models::{ApiKeyConfig, MetricsConfig, RateLimitConfig, ServerConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration, reporting every problem at once.
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(mut key_errors) = Self::validate_privileged_keys(config) {
            errors.append(&mut key_errors);
        }

        if let Err(mut rate_errors) = Self::validate_rate_limit(&config.rate_limit) {
            errors.append(&mut rate_errors);
        }

        if let Err(mut api_key_errors) = Self::validate_api_keys(&config.api_keys) {
            errors.append(&mut api_key_errors);
        }

        if let Err(e) = Self::validate_metrics(&config.metrics) {
            errors.push(e);
        }

        if EnvFilter::try_new(&config.logging.level).is_err() {
            errors.push(ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: format!("'{}' is not a valid log filter", config.logging.level),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            }),
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_privileged_keys(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        match config.master_api_key.as_deref().map(str::trim) {
            None => errors.push(ValidationError::MissingField {
                field: "master_api_key".to_string(),
            }),
            Some("") => errors.push(ValidationError::InvalidField {
                field: "master_api_key".to_string(),
                message: "must not be empty".to_string(),
            }),
            Some(_) => {}
        }

        if let Some(status_key) = config.status_page_api_key.as_deref() {
            if status_key.trim().is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: "status_page_api_key".to_string(),
                    message: "must not be empty when set".to_string(),
                });
            } else if config.master_api_key.as_deref() == Some(status_key) {
                errors.push(ValidationError::InvalidField {
                    field: "status_page_api_key".to_string(),
                    message: "must differ from master_api_key".to_string(),
                });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if rate_limit.requests == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.requests".to_string(),
                message: "Rate limit requests must be greater than 0".to_string(),
            });
        }

        match humantime::parse_duration(&rate_limit.period) {
            Ok(period) if period.is_zero() => errors.push(ValidationError::InvalidField {
                field: "rate_limit.period".to_string(),
                message: "Rate limit period must be greater than 0".to_string(),
            }),
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::InvalidField {
                field: "rate_limit.period".to_string(),
                message: format!("Invalid period '{}': {e}", rate_limit.period),
            }),
        }

        if !(400..=599).contains(&rate_limit.status_code) {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.status_code".to_string(),
                message: format!(
                    "Status code {} is not a client or server error code",
                    rate_limit.status_code
                ),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_api_keys(api_keys: &ApiKeyConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if api_keys.prefix.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "api_keys.prefix".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if !(8..=128).contains(&api_keys.random_length) {
            errors.push(ValidationError::InvalidField {
                field: "api_keys.random_length".to_string(),
                message: format!(
                    "must be between 8 and 128, got {}",
                    api_keys.random_length
                ),
            });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_metrics(metrics: &MetricsConfig) -> ValidationResult<()> {
        if !(1..=3600).contains(&metrics.window_secs) {
            return Err(ValidationError::InvalidField {
                field: "metrics.window_secs".to_string(),
                message: format!("must be between 1 and 3600, got {}", metrics.window_secs),
            });
        }
        Ok(())
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .enumerate()
            .map(|(i, e)| format!("  {}. {e}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            master_api_key: Some("master-secret".to_string()),
            status_page_api_key: Some("status-secret".to_string()),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(ServerConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_master_key() {
        let config = ServerConfig {
            master_api_key: None,
            ..valid_config()
        };
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field == "master_api_key"));
    }

    #[test]
    fn test_status_key_must_differ_from_master() {
        let config = ServerConfig {
            status_page_api_key: Some("master-secret".to_string()),
            ..valid_config()
        };
        assert!(ServerConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_invalid_listen_address() {
        let config = ServerConfig {
            listen_addr: "localhost".to_string(),
            ..valid_config()
        };
        let err = ServerConfigValidator::validate(&config).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidListenAddress { .. }));
    }

    #[test]
    fn test_multiple_errors_are_collected() {
        let mut config = valid_config();
        config.rate_limit.requests = 0;
        config.rate_limit.period = "soon".to_string();
        config.metrics.window_secs = 0;

        let err = ServerConfigValidator::validate(&config).unwrap_err();
        let ValidationError::ValidationFailed { message } = err else {
            panic!("expected aggregated failure");
        };
        assert!(message.contains("rate_limit.requests"));
        assert!(message.contains("rate_limit.period"));
        assert!(message.contains("metrics.window_secs"));
    }
}
