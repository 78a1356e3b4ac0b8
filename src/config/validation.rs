//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check paired settings (TLS cert and key)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::ServiceConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending key.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.app.name.trim().is_empty() {
        errors.push(ValidationError::new("app.name", "must not be empty"));
    }

    if config.server.port == 0 {
        errors.push(ValidationError::new("server.port", "must be between 1 and 65535"));
    }

    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "server.request_timeout_secs",
            "must be greater than 0",
        ));
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.is_empty() != tls.key_path.is_empty() {
            errors.push(ValidationError::new(
                "tls",
                "cert_path and key_path must be set together",
            ));
        }
    }

    if config.database.max_idle_conns > config.database.max_open_conns {
        errors.push(ValidationError::new(
            "database.max_idle_conns",
            format!(
                "must not exceed max_open_conns ({})",
                config.database.max_open_conns
            ),
        ));
    }

    if config.redis.db > 15 {
        errors.push(ValidationError::new("redis.db", "must be between 0 and 15"));
    }

    if config.log.filename.is_some() && config.log.max_size_mb == 0 {
        errors.push(ValidationError::new(
            "log.max_size_mb",
            "must be greater than 0 when log.filename is set",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
