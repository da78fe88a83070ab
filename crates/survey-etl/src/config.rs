//! Configuration management

use serde::{Deserialize, Serialize};

use crate::db::DbConfig;
use crate::error::{EtlError, EtlResult};

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Apply analytics migrations before each run by default.
pub const DEFAULT_RUN_MIGRATIONS: bool = true;

/// Parked submissions retried at the start of each submission run.
pub const DEFAULT_PENDING_RETRY_LIMIT: i64 = 500;

/// Attempts after which a parked submission is dropped.
pub const DEFAULT_PENDING_MAX_ATTEMPTS: i32 = 10;

/// ETL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub source: DbConfig,
    pub analytics: DbConfig,
    pub pipeline: PipelineConfig,
}

/// Knobs for the pipeline itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    pub run_migrations: bool,
    /// Maximum parked submissions retried per submission run
    pub pending_retry_limit: i64,
    /// Retry budget for a parked submission before it is dropped
    pub pending_max_attempts: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_migrations: DEFAULT_RUN_MIGRATIONS,
            pending_retry_limit: DEFAULT_PENDING_RETRY_LIMIT,
            pending_max_attempts: DEFAULT_PENDING_MAX_ATTEMPTS,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            run_migrations: std::env::var("ETL_RUN_MIGRATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RUN_MIGRATIONS),
            pending_retry_limit: std::env::var("ETL_PENDING_RETRY_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PENDING_RETRY_LIMIT),
            pending_max_attempts: std::env::var("ETL_PENDING_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PENDING_MAX_ATTEMPTS),
        }
    }

    pub fn validate(&self) -> EtlResult<()> {
        if self.pending_max_attempts <= 0 {
            return Err(EtlError::config(
                "ETL_PENDING_MAX_ATTEMPTS must be greater than 0",
            ));
        }
        if self.pending_retry_limit <= 0 {
            return Err(EtlError::config(
                "ETL_PENDING_RETRY_LIMIT must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl EtlConfig {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> EtlResult<Self> {
        dotenvy::dotenv().ok();

        let config = EtlConfig {
            source: DbConfig::from_env("SOURCE")?,
            analytics: DbConfig::from_env("ANALYTICS")?,
            pipeline: PipelineConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> EtlResult<()> {
        self.source.validate("source")?;
        self.analytics.validate("analytics")?;
        self.pipeline.validate()?;

        if self.source.url == self.analytics.url {
            tracing::warn!(
                "Source and analytics databases share a URL; analytics tables may collide with source tables"
            );
        }

        Ok(())
    }
}
