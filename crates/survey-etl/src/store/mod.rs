//! Storage seams
//!
//! Each pipeline stage receives the handles it needs instead of reaching for
//! shared session state:
//!
//! - [`RunCycleStore`]: `etl_runcycle` bookkeeping and watermarks
//! - [`SourceReader`]: change queries against the OLTP source
//! - [`AnalyticsStore`]: versioned writes to the analytics schema
//!
//! [`postgres`] implements them over `sqlx`; [`memory`] keeps everything in
//! process for tests and dry runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EtlResult;
use crate::models::{
    PackageName, PendingSubmission, RunCycle, SnapshotWrite, SourceSubmission, SourceSurvey,
    SubmissionWrite, SurveySnapshot,
};

pub use memory::{MemoryAnalyticsStore, MemorySourceStore};
pub use postgres::{PgAnalyticsStore, PgSourceReader};

/// Which slice of changed rows to select
///
/// Both variants are bounded `since < ts <= until`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFilter {
    /// Rows whose `created_date` falls in the window
    Created {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },
    /// Rows whose `updated_date` falls in the window and differs from
    /// `created_date`
    Updated {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },
}

impl ChangeFilter {
    /// Evaluate the filter against a row's timestamps
    pub fn matches(&self, created: DateTime<Utc>, updated: Option<DateTime<Utc>>) -> bool {
        match *self {
            ChangeFilter::Created { since, until } => created > since && created <= until,
            ChangeFilter::Updated { since, until } => match updated {
                Some(updated) => updated > since && updated <= until && updated != created,
                None => false,
            },
        }
    }
}

/// Result of a per-submission replace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub facts_written: usize,
    /// An earlier active version of the submission was deactivated
    pub superseded: bool,
}

/// Storage contract for run-cycle bookkeeping
#[async_trait]
pub trait RunCycleStore: Send + Sync {
    /// `max(end_time)` over successful runs of `package`, or the sentinel
    async fn last_successful_watermark(&self, package: PackageName) -> EtlResult<DateTime<Utc>>;

    /// Persist a new `success = false` run cycle immediately
    async fn begin_run(&self, package: PackageName, description: &str) -> EtlResult<RunCycle>;

    /// Flip the matching unfinished run to `success = true`
    ///
    /// Returns `false` when nothing matched, e.g. on a second call.
    async fn complete_run(&self, run_cycle_id: i64, package: PackageName) -> EtlResult<bool>;

    /// Most recent run cycles first
    async fn recent_runs(
        &self,
        package: Option<PackageName>,
        limit: i64,
    ) -> EtlResult<Vec<RunCycle>>;
}

/// Read-only access to the engagement database
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn fetch_surveys(&self, filter: ChangeFilter) -> EtlResult<Vec<SourceSurvey>>;

    async fn fetch_submissions(&self, filter: ChangeFilter) -> EtlResult<Vec<SourceSubmission>>;

    async fn surveys_by_ids(&self, ids: &[i64]) -> EtlResult<Vec<SourceSurvey>>;

    async fn submissions_by_ids(&self, ids: &[i64]) -> EtlResult<Vec<SourceSubmission>>;
}

/// Writes to the analytics schema
///
/// Each `replace_*` call is one unit of work: it either lands completely or
/// not at all.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn active_snapshot(&self, source_survey_id: i64) -> EtlResult<Option<SurveySnapshot>>;

    /// Deactivate the current snapshot of the survey (and its question
    /// definitions), then insert the new snapshot and definitions
    async fn replace_survey_snapshot(&self, write: SnapshotWrite) -> EtlResult<SurveySnapshot>;

    /// Deactivate the submission's previous facts and detail row, then insert
    /// the new ones
    async fn replace_submission_facts(&self, write: SubmissionWrite) -> EtlResult<ReplaceOutcome>;

    /// Park a submission whose survey has no active snapshot yet
    async fn park_submission(&self, submission_id: i64, source_survey_id: i64) -> EtlResult<()>;

    /// Oldest parked submissions first
    async fn pending_submissions(&self, limit: i64) -> EtlResult<Vec<PendingSubmission>>;

    /// Count a failed retry; returns the updated attempt count
    async fn record_pending_attempt(&self, submission_id: i64) -> EtlResult<i32>;

    /// Remove a submission from the pending queue
    async fn release_pending(&self, submission_id: i64) -> EtlResult<()>;
}
