//! Database connection pools
//!
//! The pipeline talks to two PostgreSQL databases: the OLTP source it reads
//! surveys and submissions from, and the analytics database it owns. Both are
//! configured the same way, under different environment prefixes.

use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::error::{EtlError, EtlResult};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Connection settings for one database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: Some(DEFAULT_IDLE_TIMEOUT_SECS),
            max_lifetime_secs: None,
        }
    }

    /// Read `<PREFIX>_DATABASE_URL` and the `<PREFIX>_DB_*` pool knobs
    ///
    /// `prefix` is e.g. `"SOURCE"` or `"ANALYTICS"`.
    pub fn from_env(prefix: &str) -> EtlResult<Self> {
        let url_var = format!("{}_DATABASE_URL", prefix);
        let url = std::env::var(&url_var)
            .map_err(|_| EtlError::config(format!("{} not set", url_var)))?;

        let var = |name: &str| std::env::var(format!("{}_DB_{}", prefix, name)).ok();

        Ok(Self {
            url,
            max_connections: var("MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            min_connections: var("MIN_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MIN_CONNECTIONS),
            connect_timeout_secs: var("CONNECT_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout_secs: var("IDLE_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .or(Some(DEFAULT_IDLE_TIMEOUT_SECS)),
            max_lifetime_secs: var("MAX_LIFETIME").and_then(|s| s.parse().ok()),
        })
    }

    pub fn validate(&self, name: &str) -> EtlResult<()> {
        if self.url.is_empty() {
            return Err(EtlError::config(format!("{} database URL cannot be empty", name)));
        }
        if self.max_connections == 0 {
            return Err(EtlError::config(format!(
                "{} max_connections must be greater than 0",
                name
            )));
        }
        if self.min_connections > self.max_connections {
            return Err(EtlError::config(format!(
                "{} min_connections ({}) cannot be greater than max_connections ({})",
                name, self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

pub async fn create_pool(config: &DbConfig) -> EtlResult<PgPool> {
    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    if let Some(max_lifetime) = config.max_lifetime_secs {
        options = options.max_lifetime(Duration::from_secs(max_lifetime));
    }

    let pool = options.connect(&config.url).await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> EtlResult<()> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the analytics schema migrations
pub async fn run_migrations(pool: &PgPool) -> EtlResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Analytics migrations applied");
    Ok(())
}
