//! Configuration file parsing (HOCON format).

use std::path::Path;

use hocon::HoconLoader;

use crate::common::error::ConfigError;
use crate::config::env::{apply_env_overrides, get_config_path};
use crate::config::types::Config;
use crate::config::validate::validate_config;

/// Load configuration from a HOCON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.display().to_string(),
        source: e,
    })?;
    load_config_str(&content)
}

/// Load configuration from a HOCON string.
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    HoconLoader::new()
        .load_str(content)
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Load a config file, apply environment overrides and validate the result.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config = apply_env_overrides(load_config(path)?);
    validate_config(&config)?;
    Ok(config)
}

/// [`load_and_validate`] on the file named by `MANDM_CONFIG`, or
/// `bridge.conf` when it is unset.
pub fn load_from_env() -> Result<Config, ConfigError> {
    load_and_validate(get_config_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        matrix {
            address = "http://localhost:8008"
            server_name = "example.org"
            room = "bridge"
            as_token = "as-secret"
            hs_token = "hs-secret"
        }
        murmur {
            address = "127.0.0.1"
            port = 6502
            server_id = 1
            secret = "ice-secret"
        }
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_str(MINIMAL).unwrap();

        assert_eq!(config.matrix.user_prefix, "mumble_");
        assert_eq!(config.matrix.tag, "A");
        assert_eq!(config.murmur.tag, "B");
        assert!(config.murmur.bridged_channels.is_empty());
        assert_eq!(config.pipeline.b_to_a, vec!["sender-suppression", "markup-stripping"]);
        assert_eq!(config.pipeline.ignored_senders, vec!["botamusique"]);
        assert_eq!(config.media.max_width, 600);
        assert_eq!(config.media.max_height, 450);
        assert_eq!(config.bridge.max_concurrent_events, 32);
    }

    #[test]
    fn test_explicit_sections_override_defaults() {
        let content = format!(
            r#"{}
            pipeline {{
                a_to_b = []
                b_to_a = ["markup-stripping"]
                ignored_senders = ["musicbot", "announcer"]
            }}
            media {{
                max_width = 320
            }}
            bridge {{
                max_concurrent_events = 4
                retry {{
                    max_retries = 0
                }}
            }}
            "#,
            MINIMAL
        );
        let config = load_config_str(&content).unwrap();

        assert!(config.pipeline.a_to_b.is_empty());
        assert_eq!(config.pipeline.b_to_a, vec!["markup-stripping"]);
        assert_eq!(config.pipeline.ignored_senders.len(), 2);
        assert_eq!(config.media.max_width, 320);
        assert_eq!(config.media.max_height, 450);
        assert_eq!(config.bridge.max_concurrent_events, 4);
        assert_eq!(config.bridge.retry.policy().max_retries, 0);
    }

    #[test]
    fn test_missing_section_fails() {
        let result = load_config_str(r#"matrix { address = "x" }"#);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_load_from_env_reads_named_file() {
        let path = std::env::temp_dir().join(format!("mandm-{}.conf", std::process::id()));
        std::fs::write(&path, MINIMAL).unwrap();

        std::env::set_var("MANDM_CONFIG", &path);
        let result = load_from_env();
        std::env::remove_var("MANDM_CONFIG");
        std::fs::remove_file(&path).unwrap();

        assert_eq!(result.unwrap().matrix.server_name, "example.org");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_config("/nonexistent/mandm.conf").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/mandm.conf"));
    }
}
