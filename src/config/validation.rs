//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, addresses parse)
//! - Check the instruction header name is a usable HTTP header name
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SinkConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::SinkConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
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

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &SinkConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new(
            "listener.max_connections",
            "must be greater than zero",
        ));
    }
    if config.listener.max_concurrent_streams == 0 {
        errors.push(ValidationError::new(
            "listener.max_concurrent_streams",
            "must be greater than zero",
        ));
    }
    if config.listener.keepalive_interval_secs == Some(0) {
        errors.push(ValidationError::new(
            "listener.keepalive_interval_secs",
            "must be greater than zero when set",
        ));
    }

    let header_name = &config.instructions.header_name;
    if header_name.is_empty() {
        errors.push(ValidationError::new(
            "instructions.header_name",
            "must not be empty",
        ));
    } else if !header_name.bytes().all(is_header_name_byte) {
        errors.push(ValidationError::new(
            "instructions.header_name",
            format!("'{}' is not a valid lowercase header name", header_name),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!(
                "'{}' is not a socket address",
                config.observability.metrics_address
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// RFC 7230 token characters, lowercase only.
fn is_header_name_byte(b: u8) -> bool {
    matches!(b,
        b'a'..=b'z' | b'0'..=b'9'
        | b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*'
        | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~')
}
