//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use reqwest::Url;

use crate::bridge::filter::is_known_handler;
use crate::common::error::ConfigError;
use crate::config::types::Config;

const PLACEHOLDER: &str = "CHANGE_ME";

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Matrix
    if Url::parse(&config.matrix.address).is_err() {
        errors.push(format!(
            "matrix.address '{}' is not a valid URL",
            config.matrix.address
        ));
    }
    for (field, value) in [
        ("matrix.server_name", &config.matrix.server_name),
        ("matrix.room", &config.matrix.room),
        ("matrix.user_prefix", &config.matrix.user_prefix),
        ("matrix.tag", &config.matrix.tag),
    ] {
        if value.is_empty() {
            errors.push(format!("{} is required", field));
        }
    }
    for (field, value) in [
        ("matrix.as_token", &config.matrix.as_token),
        ("matrix.hs_token", &config.matrix.hs_token),
    ] {
        if value.is_empty() {
            errors.push(format!("{} is required", field));
        } else if value == PLACEHOLDER {
            errors.push(format!(
                "{} has not been configured (still using placeholder)",
                field
            ));
        }
    }
    if config.matrix.listen.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!(
            "matrix.listen '{}' is not a socket address",
            config.matrix.listen
        ));
    }

    // Murmur
    if config.murmur.address.is_empty() {
        errors.push("murmur.address is required".to_string());
    }
    if config.murmur.port == 0 {
        errors.push("murmur.port must be non-zero".to_string());
    }
    if config.murmur.secret == PLACEHOLDER {
        errors.push("murmur.secret has not been configured (still using placeholder)".to_string());
    }
    if config.murmur.tag.is_empty() {
        errors.push("murmur.tag is required".to_string());
    }

    // Pipeline
    for (direction, names) in [
        ("a_to_b", &config.pipeline.a_to_b),
        ("b_to_a", &config.pipeline.b_to_a),
    ] {
        for (i, name) in names.iter().enumerate() {
            if !is_known_handler(name) {
                errors.push(format!(
                    "pipeline.{}[{}] '{}' is not a known handler",
                    direction, i, name
                ));
            }
        }
    }

    // Media
    if config.media.max_width == 0 || config.media.max_height == 0 {
        errors.push("media.max_width and media.max_height must be non-zero".to_string());
    }
    if config.media.fetch_timeout_secs == 0 {
        errors.push("media.fetch_timeout_secs must be non-zero".to_string());
    }

    // Dispatcher
    if config.bridge.max_concurrent_events == 0 {
        errors.push("bridge.max_concurrent_events must be at least 1".to_string());
    }
    if config.bridge.retry.min_delay_ms > config.bridge.retry.max_delay_ms {
        errors.push("bridge.retry.min_delay_ms exceeds max_delay_ms".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}
