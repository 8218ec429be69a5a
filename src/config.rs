use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::env;
use tracing::{info, warn};

use crate::{log_system_event, log_validation};

pub const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub resources: ResourceConfig,
    pub import: ImportConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

/// Location of the read-only static resources (extra info, file indexes)
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    pub directory: String,
}

/// Limits applied while importing contribution packs
#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    pub max_image_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            resources: ResourceConfig::from_env()?,
            import: ImportConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            resource_directory = %self.resources.directory,
            max_image_bytes = self.import.max_image_bytes,
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.import.max_image_bytes == 0 {
            return Err(anyhow!("IMPORT_MAX_IMAGE_BYTES must be greater than 0"));
        }

        if self.resources.directory.trim().is_empty() {
            warn!("RESOURCE_DIRECTORY is empty, static resources will resolve relative to the working directory");
        }

        let base_level = self.logging.level.split(',').next().unwrap_or("").to_lowercase();
        if !["trace", "debug", "info", "warn", "error"].contains(&base_level.as_str()) {
            warn!("Invalid log level '{}', using 'info' as fallback", self.logging.level);
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:question_bank.db".to_string());

        Ok(DatabaseConfig { url })
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info,question_bank=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

impl ResourceConfig {
    fn from_env() -> Result<Self> {
        let directory = env::var("RESOURCE_DIRECTORY").unwrap_or_else(|_| "resources".to_string());

        Ok(ResourceConfig { directory })
    }
}

impl ImportConfig {
    fn from_env() -> Result<Self> {
        let max_image_bytes = match env::var("IMPORT_MAX_IMAGE_BYTES") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|_| {
                anyhow!("Invalid IMPORT_MAX_IMAGE_BYTES value: '{}'. Must be a positive integer", raw)
            })?,
            Err(_) => DEFAULT_MAX_IMAGE_BYTES,
        };

        Ok(ImportConfig { max_image_bytes })
    }
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}
