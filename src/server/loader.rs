//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            File::with_name(&format!(
                "config/{}",
                std::env::var("SHELLGATE_ENV").unwrap_or_else(|_| "development".to_string())
            ))
            .required(false),
        )
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority)
        .add_source(env_source())
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// `SHELLGATE_` variables, with `__` between nested keys.
fn env_source() -> Environment {
    // config-rs 0.14 uses the separator ("__") after the prefix unless told
    // otherwise, which would turn SHELLGATE_GATEWAY__AUTH_TIMEOUT_SECS into
    // SHELLGATE__GATEWAY__AUTH_TIMEOUT_SECS and break the `.env` convention.
    Environment::with_prefix("SHELLGATE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_deserialize() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server.port, 3000);
        assert!(!config.logging.json);
        assert_eq!(config.gateway.auth_timeout_secs, 10);
        assert_eq!(config.gateway.pty.term, "xterm-256color");
        assert!(!config.gateway.execution.local_enabled);
        assert!(config.gateway.default_target.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_target_section() {
        let overlay = r#"
            [gateway.default_target]
            name = "lab"
            host = "10.0.0.5"
            username = "deploy"
            password = "secret"
        "#;
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from_str(overlay, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let target = config.gateway.default_target.unwrap();
        assert_eq!(target.host, "10.0.0.5");
        assert_eq!(target.port, 22);
    }

    #[test]
    fn test_env_single_underscore_after_prefix() {
        let vars = [
            ("SHELLGATE_GATEWAY__AUTH_TIMEOUT_SECS", "42"),
            ("SHELLGATE_SERVER__PORT", "8080"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(env_source().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.gateway.auth_timeout_secs, 42);
        assert_eq!(config.server.port, 8080);
    }
}
