//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// `DATABASE_URL` value selecting the in-process engine.
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Minimum JWT secret length in bytes.
const MIN_JWT_SECRET_LEN: usize = 32;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// `postgres://...` or `memory://`.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Per-statement timeout enforced by the engine (default: 10s).
    pub statement_timeout: Duration,

    /// HMAC key for session tokens.
    pub jwt_secret: String,

    /// Session token lifetime in seconds (default: 90 days).
    pub jwt_expires_in_secs: i64,

    /// Period of the rating summary reconciler; zero disables it.
    pub reconcile_interval: Duration,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,

    /// Return password-reset tokens in the forgot-password response.
    /// Only for deployments without mail delivery (default: false).
    pub expose_reset_tokens: bool,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = var_or("PORT", "3000")
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = var_or("DATABASE_MAX_CONNECTIONS", "10")
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let statement_timeout = var_or("STATEMENT_TIMEOUT_MS", "10000")
            .parse()
            .map(Duration::from_millis)
            .context("STATEMENT_TIMEOUT_MS must be a valid u64")?;

        let jwt_secret =
            env::var("JWT_SECRET").context("JWT_SECRET environment variable is required")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            bail!("JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} bytes");
        }

        let jwt_expires_in_secs: i64 = var_or("JWT_EXPIRES_IN_SECS", "7776000")
            .parse()
            .context("JWT_EXPIRES_IN_SECS must be a valid i64")?;
        if jwt_expires_in_secs <= 0 {
            bail!("JWT_EXPIRES_IN_SECS must be positive");
        }

        let reconcile_interval = var_or("RECONCILE_INTERVAL_SECS", "300")
            .parse()
            .map(Duration::from_secs)
            .context("RECONCILE_INTERVAL_SECS must be a valid u64")?;

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| vec!["*".to_string()]);

        let expose_reset_tokens = var_or("EXPOSE_RESET_TOKENS", "false")
            .parse()
            .context("EXPOSE_RESET_TOKENS must be true or false")?;

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            statement_timeout,
            jwt_secret,
            jwt_expires_in_secs,
            reconcile_interval,
            cors_allowed_origins,
            expose_reset_tokens,
        })
    }

    /// Configuration for an in-process deployment, used by tests.
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            port: 0,
            database_url: MEMORY_DATABASE_URL.to_string(),
            database_max_connections: 1,
            statement_timeout: Duration::from_secs(10),
            jwt_secret: jwt_secret.into(),
            jwt_expires_in_secs: 3600,
            reconcile_interval: Duration::ZERO,
            cors_allowed_origins: vec!["*".to_string()],
            expose_reset_tokens: true,
        }
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }
}
