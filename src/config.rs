/// Configuration management for the entitlement engine
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "entitlement_engine=debug,tower_http=debug";

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
    pub max_connections: u32,
}

/// Engine behaviour knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whole-operation attempts made before a Conflict reaches the caller
    pub conflict_retries: u32,
    /// Length of server-generated activation codes
    pub code_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 3,
            code_length: 8,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info` or `entitlement_engine=trace`
    pub level: String,
    /// Emit one JSON object per event instead of human-readable lines
    pub json: bool,
}

impl LoggingConfig {
    pub fn env_filter(&self) -> EngineResult<EnvFilter> {
        EnvFilter::try_new(&self.level)
            .map_err(|e| EngineError::Validation(format!("Invalid RUST_LOG '{}': {}", self.level, e)))
    }
}

/// Read an env var and parse it, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> EngineResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| EngineError::Validation(format!("Invalid value for {}: {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> EngineResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("ENGINE_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_var("ENGINE_PORT", 8080u16)?;

        let data_directory: PathBuf = env::var("ENGINE_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("ENGINE_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("engine.sqlite"));
        let max_connections = parse_var("ENGINE_DB_MAX_CONNECTIONS", 10u32)?;

        let defaults = EngineConfig::default();
        let conflict_retries = parse_var("ENGINE_CONFLICT_RETRIES", defaults.conflict_retries)?;
        let code_length = parse_var("ENGINE_CODE_LENGTH", defaults.code_length)?;

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
        let log_json = parse_var("ENGINE_LOG_JSON", false)?;

        Ok(ServerConfig {
            service: ServiceConfig { hostname, port },
            storage: StorageConfig {
                data_directory,
                database,
                max_connections,
            },
            engine: EngineConfig {
                conflict_retries,
                code_length,
            },
            logging: LoggingConfig {
                level: log_level,
                json: log_json,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        if self.service.hostname.is_empty() {
            return Err(EngineError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.storage.max_connections == 0 {
            return Err(EngineError::Validation(
                "ENGINE_DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        if !(1..=10).contains(&self.engine.conflict_retries) {
            return Err(EngineError::Validation(
                "ENGINE_CONFLICT_RETRIES must be between 1 and 10".to_string(),
            ));
        }

        if !(6..=32).contains(&self.engine.code_length) {
            return Err(EngineError::Validation(
                "ENGINE_CODE_LENGTH must be between 6 and 32".to_string(),
            ));
        }

        self.logging.env_filter()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ServerConfig {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                data_directory: "./data".into(),
                database: "./data/engine.sqlite".into(),
                max_connections: 4,
            },
            engine: EngineConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_retry_bounds_enforced() {
        let mut config = sample();
        config.engine.conflict_retries = 0;
        assert!(config.validate().is_err());

        config.engine.conflict_retries = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_code_length_bounds_enforced() {
        let mut config = sample();
        config.engine.code_length = 4;
        assert!(matches!(config.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_log_level_drives_filter() {
        let mut config = sample();
        assert_eq!(config.logging.env_filter().unwrap().to_string(), "info");

        config.logging.level = DEFAULT_LOG_FILTER.to_string();
        let filter = config.logging.env_filter().unwrap().to_string();
        assert!(filter.contains("entitlement_engine=debug"));
        assert!(filter.contains("tower_http=debug"));

        config.logging.level = "entitlement_engine=loud".to_string();
        assert!(matches!(config.validate(), Err(EngineError::Validation(_))));
    }
}
