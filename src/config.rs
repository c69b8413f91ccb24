use crate::error::{AppError, AppResult};

// ============================================================================
// Configuration Constants
// ============================================================================

// Default port values
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HTTP_PORT: u16 = 8081;

// Access tokens are short-lived; the marketplace's auth service refreshes them
const DEFAULT_ACCESS_TOKEN_TTL_HOURS: i64 = 1;

// Database pool defaults
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_DB_ACQUIRE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_DB_IDLE_TIMEOUT_SECS: u64 = 600;

/// Upper bound for a single inbound WebSocket frame. Chat messages are short
/// text; anything larger indicates a misbehaving client.
pub const MAX_WEBSOCKET_MESSAGE_SIZE: usize = 64 * 1024;

/// How long shutdown waits for open connection tasks to flush their close
/// frames before aborting them.
pub const SHUTDOWN_DRAIN_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// When enabled, message logs include sender/receiver identifiers.
    /// Off by default so production logs carry no conversation metadata.
    pub enable_message_metadata: bool,
}

/// Database connection pool configuration
#[derive(Clone, Debug)]
pub struct DbConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Timeout for acquiring a connection from the pool (seconds)
    pub acquire_timeout_secs: u64,
    /// Timeout for idle connections before they are closed (seconds)
    pub idle_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    /// Shared HS256 secret; must match the marketplace auth service that
    /// issues the tokens this server verifies.
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub access_token_ttl_hours: i64,
    /// WebSocket listener port
    pub port: u16,
    /// HTTP listener port (history, health, metrics)
    pub http_port: u16,
    pub rust_log: String,
    pub db: DbConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL must be set".to_string()))?;
        let jwt_secret = std::env::var("JWT_SECRET")
            .map_err(|_| AppError::Config("JWT_SECRET must be set".to_string()))?;
        if jwt_secret.trim().is_empty() {
            return Err(AppError::Config("JWT_SECRET must not be empty".to_string()));
        }

        Ok(Self {
            database_url,
            jwt_secret,
            jwt_issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "reclaim".to_string()),
            access_token_ttl_hours: env_parse(
                "ACCESS_TOKEN_TTL_HOURS",
                DEFAULT_ACCESS_TOKEN_TTL_HOURS,
            ),
            port: env_parse("PORT", DEFAULT_PORT),
            http_port: env_parse("HTTP_PORT", DEFAULT_HTTP_PORT),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            db: DbConfig {
                max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
                acquire_timeout_secs: env_parse(
                    "DB_ACQUIRE_TIMEOUT_SECS",
                    DEFAULT_DB_ACQUIRE_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_parse("DB_IDLE_TIMEOUT_SECS", DEFAULT_DB_IDLE_TIMEOUT_SECS),
            },
            logging: LoggingConfig {
                enable_message_metadata: env_parse("LOG_MESSAGE_METADATA", false),
            },
        })
    }
}

/// Reads an environment variable and parses it, falling back to the default
/// when the variable is unset or malformed.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
