//! Validation for configuration and request payloads.
//!
//! Implementations collect every problem they find instead of stopping at the
//! first, so a caller fixing a config file sees the whole list at once.

use thiserror::Error;

use crate::config::{Config, NetworkConfig, ObservabilityConfig, PlannerServiceConfig};

/// Validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Shorthand for [`ValidationError::InvalidValue`].
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Collapse collected errors: none is `Ok`, one is returned as is.
    pub fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections and payloads.
pub trait Validate {
    /// Validate this value.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.network.validate() {
            errors.push(e);
        }

        if let Some(port) = self.services.planner.port {
            if port == 0 {
                errors.push(ValidationError::InvalidPort {
                    port,
                    field: "services.planner.port".into(),
                });
            }
        }

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if let Err(e) = self.planner.validate() {
            errors.push(e);
        }

        ValidationError::collect(errors)
    }

    /// Load, apply environment overrides and validate.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for NetworkConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.bind.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "network.bind".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::invalid(
                "observability.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::invalid(
                "observability.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        Ok(())
    }
}

impl Validate for PlannerServiceConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.workers == 0 || self.workers > 256 {
            errors.push(ValidationError::invalid(
                "planner.workers",
                "must be between 1 and 256",
            ));
        }

        for (field, value) in [
            ("planner.max_batch_sequences", self.max_batch_sequences),
            ("planner.max_compare_sequences", self.max_compare_sequences),
            ("planner.max_monte_carlo_paths", self.max_monte_carlo_paths),
        ] {
            if value == 0 {
                errors.push(ValidationError::invalid(field, "must be greater than 0"));
            }
        }

        if self.max_compare_sequences < 2 {
            errors.push(ValidationError::invalid(
                "planner.max_compare_sequences",
                "compare needs room for at least 2 sequences",
            ));
        }

        if self.default_timeout_ms == Some(0) {
            errors.push(ValidationError::invalid(
                "planner.default_timeout_ms",
                "must be greater than 0 when set",
            ));
        }

        ValidationError::collect(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "loud".into();
        match config.validate() {
            Err(ValidationError::InvalidValue { field, .. }) => {
                assert_eq!(field, "observability.log_level");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.planner.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_multiple_errors_are_collected() {
        let mut config = Config::default();
        config.planner.workers = 0;
        config.planner.max_monte_carlo_paths = 0;
        config.services.planner.port = Some(0);

        match config.validate() {
            Err(ValidationError::Multiple(errors)) => {
                assert_eq!(errors.len(), 2);
                let message = ValidationError::Multiple(errors).to_string();
                assert!(message.contains("planner.workers"));
                assert!(message.contains("planner.max_monte_carlo_paths"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = PlannerServiceConfig {
            default_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
