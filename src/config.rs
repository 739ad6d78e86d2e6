//! Process configuration
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (MOVIEPOLLS__SECTION__KEY)
//! 4. Command-line flags (applied by the binary)
//!
//! Site policy such as vote caps or signup channels is not configured here;
//! it lives in the data layer and is read through [`crate::settings`].

use serde::Deserialize;
use std::path::PathBuf;

use crate::error::AppError;
use crate::logging::LogLevel;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
    pub cycles: CycleConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (default 8090)
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Data layer selection
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Backend name, see [`crate::data::available_backends`]
    pub backend: String,
    /// Document file (json) or database file (sqlite)
    pub path: PathBuf,
}

/// Local directories served by the HTTP layer
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Where poster JPEGs are written and served from
    pub posters_dir: PathBuf,
    /// Static assets (CSS, favicon)
    pub static_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// silent, error, info or debug
    pub level: String,
    /// Optional file receiving a copy of every emitted line
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn level(&self) -> Result<LogLevel, AppError> {
        self.level.parse()
    }
}

/// Outbound HTTP configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout for metadata providers and OAuth endpoints
    pub timeout_seconds: u64,
}

/// Cycle housekeeping
#[derive(Debug, Clone, Deserialize)]
pub struct CycleConfig {
    /// Age in cycles after which unwatched votes decay; 0 disables decay
    pub vote_decay: i64,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (MOVIEPOLLS__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8090)?
            .set_default("database.backend", "json")?
            .set_default("database.path", "db/data.json")?
            .set_default("storage.posters_dir", "posters")?
            .set_default("storage.static_dir", "static")?
            .set_default("logging.level", "info")?
            .set_default("http.timeout_seconds", 30)?
            .set_default("cycles.vote_decay", 0)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("MOVIEPOLLS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Configuration for tests and embedded use: json backend under `root`.
    pub fn for_directory(root: &std::path::Path) -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            database: DatabaseConfig {
                backend: "json".to_string(),
                path: root.join("db").join("data.json"),
            },
            storage: StorageConfig {
                posters_dir: root.join("posters"),
                static_dir: root.join("static"),
            },
            logging: LoggingConfig {
                level: "silent".to_string(),
                file: None,
            },
            http: HttpConfig {
                timeout_seconds: 10,
            },
            cycles: CycleConfig { vote_decay: 0 },
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !crate::data::available_backends().contains(&self.database.backend.as_str()) {
            return Err(AppError::Config(format!(
                "database.backend must be one of {:?}, got {:?}",
                crate::data::available_backends(),
                self.database.backend
            )));
        }

        if self.http.timeout_seconds == 0 {
            return Err(AppError::Config(
                "http.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.cycles.vote_decay < 0 {
            return Err(AppError::Config(
                "cycles.vote_decay must not be negative".to_string(),
            ));
        }

        self.logging.level()?;
        Ok(())
    }
}
