//! Survey analytics ETL
//!
//! Incrementally copies surveys and their submissions from the engagement
//! database into a normalized analytics schema.
//!
//! # Overview
//!
//! Surveys store their questions as a form-builder JSON document and
//! submissions store answers as a key/answer JSON object. The pipeline turns
//! those into:
//!
//! - **Snapshots**: one versioned `survey` row per processed survey version,
//!   with typed `request_type_*` question definitions
//! - **Facts**: one `response_type_*` row per answered question, or per
//!   selected option for multi-select questions
//! - **Details**: one `user_response_detail` row per submission
//!
//! Rows are never deleted. A re-processed survey or submission deactivates
//! its previous rows (`is_active = false`) and inserts new ones.
//!
//! # Run cycles
//!
//! Every phase (`survey`, `submission`) is recorded in `etl_runcycle` before
//! it starts and flipped to `success = true` when it finishes. The next run
//! extracts rows changed since the latest successful run's end time, so a
//! crashed run is simply retried.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use survey_etl::{config::EtlConfig, db, pipeline::PipelineOrchestrator, store};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::load()?;
//!     let source = store::PgSourceReader::new(db::create_pool(&config.source).await?);
//!     let analytics = Arc::new(store::PgAnalyticsStore::new(
//!         db::create_pool(&config.analytics).await?,
//!     ));
//!
//!     let orchestrator = PipelineOrchestrator::new(
//!         Arc::new(source),
//!         analytics.clone(),
//!         analytics,
//!         config.pipeline,
//!     );
//!     orchestrator.run_all().await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod store;

pub use error::{EtlError, EtlResult};
