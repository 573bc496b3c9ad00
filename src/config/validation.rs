//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check that the proxy URL is usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MessagingConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::MessagingConfig;
use crate::net::ProxySettings;
use crate::observability::logging::PrintoutType;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &MessagingConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let msg = &config.message;

    let timeouts = [
        ("message.connection_timeout_ms", msg.connection_timeout_ms),
        ("message.handshake_timeout_ms", msg.handshake_timeout_ms),
        ("message.receive_chunk_timeout_ms", msg.receive_chunk_timeout_ms),
        ("message.receive_global_timeout_ms", msg.receive_global_timeout_ms),
        ("message.async_send_timeout_ms", msg.async_send_timeout_ms),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }
    if msg.connection_timeout_override_ms == Some(0) {
        errors.push(ValidationError::new(
            "message.connection_timeout_override_ms",
            "must be greater than zero",
        ));
    }
    if let Some(service) = &msg.service_timeout {
        if service.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "message.service_timeout.timeout_ms",
                "must be greater than zero",
            ));
        }
    }

    if msg.receive_chunk_timeout_ms > msg.receive_global_timeout_ms {
        errors.push(ValidationError::new(
            "message.receive_chunk_timeout_ms",
            "must not exceed message.receive_global_timeout_ms",
        ));
    }

    if msg.data_printout_type.parse::<PrintoutType>().is_err() {
        errors.push(ValidationError::new(
            "message.data_printout_type",
            format!("unknown printout type '{}'", msg.data_printout_type),
        ));
    }

    if !config.agent.fog_domain.is_empty() && config.agent.fog_port == 0 {
        errors.push(ValidationError::new("agent.fog_port", "must be set when fog_domain is configured"));
    }

    if config.resilience.max_consecutive_failures == 0 {
        errors.push(ValidationError::new(
            "resilience.max_consecutive_failures",
            "must be greater than zero",
        ));
    }

    if let Some(proxy) = &config.proxy {
        if let Err(e) = ProxySettings::from_url(&proxy.url) {
            errors.push(ValidationError::new("proxy.url", e.to_string()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
