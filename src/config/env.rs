//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `MANDM_CONFIG` - Path of the config file
//! - `MANDM_MATRIX_ADDRESS` - Homeserver base URL
//! - `MANDM_AS_TOKEN` - Appservice token
//! - `MANDM_HS_TOKEN` - Homeserver token
//! - `MANDM_MURMUR_SECRET` - Murmur ICE secret

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "MANDM";

/// Apply environment variable overrides to a config.
///
/// Lets tokens and secrets live outside the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(address) = env::var(format!("{}_MATRIX_ADDRESS", ENV_PREFIX)) {
        config.matrix.address = address;
    }
    if let Ok(token) = env::var(format!("{}_AS_TOKEN", ENV_PREFIX)) {
        config.matrix.as_token = token;
    }
    if let Ok(token) = env::var(format!("{}_HS_TOKEN", ENV_PREFIX)) {
        config.matrix.hs_token = token;
    }
    if let Ok(secret) = env::var(format!("{}_MURMUR_SECRET", ENV_PREFIX)) {
        config.murmur.secret = secret;
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `MANDM_CONFIG`, otherwise returns "bridge.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "bridge.conf".to_string())
}
