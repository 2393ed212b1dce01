//! Configuration management module.
//!
//! Supports loading configuration from:
//! - TOML files (config/default.toml, config/{profile}.toml)
//! - A `.env` file in the working directory
//! - Environment variables with `PERSIST_DICT__<SECTION>__<KEY>` pattern

mod storage;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use storage::{FileStorageConfig, SqlStorageConfig, StorageBackend, StorageConfig};

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{PERSIST_DICT_PROFILE}.toml` (if `PERSIST_DICT_PROFILE` is set)
    /// 3. Environment variables with `PERSIST_DICT__` prefix
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is fine
        dotenvy::dotenv().ok();

        let profile =
            std::env::var("PERSIST_DICT_PROFILE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{profile}")).required(false))
            // PERSIST_DICT__STORAGE__BACKEND=sql -> storage.backend = "sql"
            .add_source(
                Environment::with_prefix("PERSIST_DICT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: Self = config.try_deserialize()?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;

        if !matches!(self.observability.log_format.as_str(), "text" | "json") {
            return Err(ConfigError::Message(format!(
                "observability.log_format must be 'text' or 'json', got '{}'",
                self.observability.log_format
            )));
        }

        Ok(())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "text" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.storage.sql.table, "Dict");
        assert_eq!(config.observability.log_format, "text");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_from_toml() {
        let raw = r#"
            [storage]
            backend = "sql"

            [storage.sql]
            path = "/var/lib/dict.db"
            table = "Sessions"
            busy_timeout_ms = 250
        "#;

        let config: AppConfig = Config::builder()
            .add_source(File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Sql);
        assert_eq!(config.storage.sql.table, "Sessions");
        assert_eq!(config.storage.sql.busy_timeout_ms, 250);
        assert!(config.storage.sql.create_table);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        let mut config = AppConfig::default();
        config.observability.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}
