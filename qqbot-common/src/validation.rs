//! Configuration validation.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{ChatConfig, Config, LlmConfig, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port} for {field}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

/// Collapse a list of errors into one result.
fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(ValidationError::Multiple(errors))
    }
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for (port, field) in [
            (self.gateway_port(), "services.gateway.port"),
            (self.api_port(), "services.api.port"),
        ] {
            if port == 0 {
                errors.push(ValidationError::InvalidPort {
                    port,
                    field: field.into(),
                });
            }
        }

        if self.gateway_port() == self.api_port() {
            errors.push(ValidationError::Conflict {
                reason: format!(
                    "Port {} is used by both services.gateway.port and services.api.port",
                    self.gateway_port()
                ),
            });
        }

        if self.network.bind.parse::<std::net::IpAddr>().is_err() {
            errors.push(ValidationError::InvalidValue {
                field: "network.bind".into(),
                reason: format!("'{}' is not an IP address", self.network.bind),
            });
        }

        if let Err(e) = self.llm.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        collect(errors)
    }
}

impl Validate for LlmConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            errors.push(ValidationError::InvalidValue {
                field: "llm.base_url".into(),
                reason: "must start with http:// or https://".into(),
            });
        }

        if self.request_timeout_secs == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "llm.request_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        collect(errors)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        const FORMATS: &[&str] = &["pretty", "json"];

        let mut errors = Vec::new();
        if !LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            errors.push(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of {LEVELS:?}"),
            });
        }
        if !FORMATS.contains(&self.log_format.as_str()) {
            errors.push(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of {FORMATS:?}"),
            });
        }
        collect(errors)
    }
}

impl Validate for ChatConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.model.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "model".into(),
            });
        }
        if self.max_tokens == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "maxTokens".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            errors.push(ValidationError::InvalidValue {
                field: "temperature".into(),
                reason: "must be between 0 and 2".into(),
            });
        }
        if self.max_history_length == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "maxHistoryLength".into(),
                reason: "must be at least 1".into(),
            });
        } else if self.summary_threshold >= self.max_history_length {
            errors.push(ValidationError::InvalidValue {
                field: "summaryThreshold".into(),
                reason: format!(
                    "must be less than maxHistoryLength ({})",
                    self.max_history_length
                ),
            });
        }

        collect(errors)
    }
}
