//! Configuration management

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/tabimport";

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Rows per chunk task.
pub const DEFAULT_IMPORT_CHUNK_SIZE: usize = 100;

/// Connection used when an importer does not name one.
pub const DEFAULT_IMPORT_CONNECTION: &str = "tokio";

/// Concurrent chunk tasks per queue on the tokio backend.
pub const DEFAULT_IMPORT_WORKER_CONCURRENCY: usize = 4;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub import: ImportConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Import pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConfig {
    pub chunk_size: usize,
    /// Upper bound on rows per import; unlimited when unset
    pub max_rows: Option<usize>,
    pub default_connection: String,
    pub worker_concurrency: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_IMPORT_CHUNK_SIZE,
            max_rows: None,
            default_connection: DEFAULT_IMPORT_CONNECTION.to_string(),
            worker_concurrency: DEFAULT_IMPORT_WORKER_CONCURRENCY,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn max_rows_from_env() -> anyhow::Result<Option<usize>> {
    match std::env::var("IMPORT_MAX_ROWS") {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("IMPORT_MAX_ROWS must be a row count, got '{}'", raw)),
        _ => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Read configuration from the process environment without validating it
    ///
    /// Unparseable numeric settings fall back to their defaults, except
    /// `IMPORT_MAX_ROWS`, which must parse when set.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            server: ServerConfig {
                host: std::env::var("TABIMPORT_HOST")
                    .unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_or("TABIMPORT_PORT", DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: env_or(
                    "TABIMPORT_SHUTDOWN_TIMEOUT",
                    DEFAULT_SHUTDOWN_TIMEOUT_SECS,
                ),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            import: ImportConfig {
                chunk_size: env_or("IMPORT_CHUNK_SIZE", DEFAULT_IMPORT_CHUNK_SIZE),
                max_rows: max_rows_from_env()?,
                default_connection: std::env::var("IMPORT_QUEUE_CONNECTION")
                    .unwrap_or_else(|_| DEFAULT_IMPORT_CONNECTION.to_string()),
                worker_concurrency: env_or(
                    "IMPORT_WORKER_CONCURRENCY",
                    DEFAULT_IMPORT_WORKER_CONCURRENCY,
                ),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.import.chunk_size == 0 {
            anyhow::bail!("IMPORT_CHUNK_SIZE must be greater than 0");
        }

        if self.import.worker_concurrency == 0 {
            anyhow::bail!("IMPORT_WORKER_CONCURRENCY must be greater than 0");
        }

        if self.import.default_connection.trim().is_empty() {
            anyhow::bail!("IMPORT_QUEUE_CONNECTION cannot be empty");
        }

        if self.import.max_rows == Some(0) {
            tracing::warn!("IMPORT_MAX_ROWS is 0 - every non-empty import will be rejected");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            import: ImportConfig::default(),
        }
    }
}
